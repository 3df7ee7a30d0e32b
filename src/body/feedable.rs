use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};

use super::{Body, BodyGenerator, BodyState, ChunkBuf};
use crate::common::watch;

/// 新内容到达时的回调。
///
/// 闭包 `Fn()` 自动实现此 trait。
pub trait FeedListener: Send + Sync {
    /// 每次 [`FeedableBodyGenerator::feed`] 成功推入一个分片后调用。
    fn on_content_added(&self);
}

impl<F> FeedListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_content_added(&self) {
        (self)()
    }
}

/// 由调用方在请求开始后陆续推入内容的请求体。
///
/// 分片按 FIFO 顺序写出。空的非末尾分片表示"暂时没有数据"，而不是
/// body 结束；只有 `is_last = true` 的分片才结束 body。
///
/// 三种队列容量：
///
/// - [`unbounded`](Self::unbounded)：从不拒绝，也没有背压。生产者比连接快时，
///   内存会随之增长；
/// - [`bounded`](Self::bounded)：队列满时 `feed` 返回
///   [`is_body_queue_full`](crate::Error::is_body_queue_full) 错误；
/// - [`blocking`](Self::blocking)：队列满时阻塞（park）生产者线程，
///   直到写出循环腾出空间。
///
/// 已经开始发送的 feedable body 无法重放，因此这类请求不会被重试。
#[derive(Clone)]
pub struct FeedableBodyGenerator {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Mutex<Queue>,
    space: Condvar,
    capacity: Capacity,
    notify: watch::Sender,
    changed: watch::Receiver,
    listener: Mutex<Option<Arc<dyn FeedListener>>>,
}

struct Queue {
    parts: VecDeque<Chunk>,
    last_fed: bool,
}

struct Chunk {
    bytes: Bytes,
    last: bool,
}

#[derive(Clone, Copy, Debug)]
enum Capacity {
    Unbounded,
    Bounded(usize),
    Blocking(usize),
}

impl FeedableBodyGenerator {
    /// 无界队列。
    pub fn unbounded() -> FeedableBodyGenerator {
        FeedableBodyGenerator::with_capacity(Capacity::Unbounded)
    }

    /// 最多缓存 `capacity` 个分片，超出时拒绝。
    pub fn bounded(capacity: usize) -> FeedableBodyGenerator {
        FeedableBodyGenerator::with_capacity(Capacity::Bounded(capacity.max(1)))
    }

    /// 最多缓存 `capacity` 个分片，超出时阻塞生产者。
    ///
    /// 不要在异步任务里对它调用 `feed`，否则会阻塞运行时线程。
    pub fn blocking(capacity: usize) -> FeedableBodyGenerator {
        FeedableBodyGenerator::with_capacity(Capacity::Blocking(capacity.max(1)))
    }

    fn with_capacity(capacity: Capacity) -> FeedableBodyGenerator {
        let (notify, changed) = watch::channel(1);
        FeedableBodyGenerator {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    parts: VecDeque::new(),
                    last_fed: false,
                }),
                space: Condvar::new(),
                capacity,
                notify,
                changed,
                listener: Mutex::new(None),
            }),
        }
    }

    /// 推入一个分片。`is_last` 为 `true` 表示 body 到此结束。
    ///
    /// # Errors
    ///
    /// - 已经推入过最后一个分片；
    /// - 有界队列已满。
    pub fn feed(&self, chunk: impl Into<Bytes>, is_last: bool) -> crate::Result<()> {
        let mut queue = self.shared.lock_queue();
        if queue.last_fed {
            return Err(crate::Error::new_user_feed_after_last());
        }
        match self.shared.capacity {
            Capacity::Unbounded => {}
            Capacity::Bounded(cap) => {
                if queue.parts.len() >= cap {
                    return Err(crate::Error::new_user_body_queue_full(cap));
                }
            }
            Capacity::Blocking(cap) => {
                while queue.parts.len() >= cap {
                    queue = match self.shared.space.wait(queue) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
        queue.parts.push_back(Chunk {
            bytes: chunk.into(),
            last: is_last,
        });
        queue.last_fed = is_last;
        drop(queue);

        trace!("feedable body: chunk added, last = {}", is_last);
        self.shared.notify.bump();
        let listener = self.shared.lock_listener().clone();
        if let Some(listener) = listener {
            listener.on_content_added();
        }
        Ok(())
    }

    /// 注册内容到达的回调，替换之前的回调。
    pub fn set_listener<L>(&self, listener: L)
    where
        L: FeedListener + 'static,
    {
        *self.shared.lock_listener() = Some(Arc::new(listener));
    }

    /// 当前排队的分片数。
    pub fn queued(&self) -> usize {
        self.shared.lock_queue().parts.len()
    }
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<dyn FeedListener>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BodyGenerator for FeedableBodyGenerator {
    fn create_body(&self) -> crate::Result<Box<dyn Body>> {
        Ok(Box::new(FeedableBody {
            shared: self.shared.clone(),
            changed: self.shared.changed.clone(),
            done: false,
        }))
    }

    fn is_replayable(&self) -> bool {
        false
    }
}

impl fmt::Debug for FeedableBodyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedableBodyGenerator")
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

struct FeedableBody {
    shared: Arc<Shared>,
    changed: watch::Receiver,
    done: bool,
}

impl Body for FeedableBody {
    fn content_length(&self) -> Option<u64> {
        None
    }

    fn transfer_to(&mut self, target: &mut ChunkBuf) -> crate::Result<BodyState> {
        if self.done {
            return Ok(BodyState::Stop);
        }

        let mut queue = self.shared.lock_queue();
        let mut wrote = false;
        let mut freed = false;
        while target.remaining() > 0 {
            let front = match queue.parts.front_mut() {
                Some(front) => front,
                None => break,
            };
            let n = target.put_slice(&front.bytes);
            front.bytes.advance(n);
            wrote |= n > 0;
            if !front.bytes.is_empty() {
                break;
            }
            let last = front.last;
            queue.parts.pop_front();
            freed = true;
            if last {
                self.done = true;
                break;
            }
        }
        drop(queue);

        if freed {
            self.shared.space.notify_all();
        }

        if self.done {
            Ok(BodyState::Stop)
        } else if wrote || target.remaining() == 0 {
            Ok(BodyState::Continue)
        } else {
            Ok(BodyState::Suspend)
        }
    }

    fn poll_resume(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        // 先注册唤醒器再检查队列，feed 在两者之间发生也不会丢失通知
        if self.changed.load(cx) == watch::CLOSED {
            return Poll::Ready(());
        }
        if self.shared.lock_queue().parts.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}
