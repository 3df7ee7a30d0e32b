//! 一个极小的"值变化"通知通道。
//!
//! 仅保存一个 `usize`，发送端在值变化时唤醒唯一的接收端。
//! feedable body 用它在生产者推入新分片时唤醒处于 `Suspend` 的写出循环：
//! 发送端每次推入都把代数（generation）加一。

use atomic_waker::AtomicWaker;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::task;

type Value = usize;

pub(crate) const CLOSED: usize = 0;

pub(crate) fn channel(initial: Value) -> (Sender, Receiver) {
    debug_assert!(
        initial != CLOSED,
        "watch::channel initial state of 0 is reserved"
    );

    let shared = Arc::new(Shared {
        value: AtomicUsize::new(initial),
        waker: AtomicWaker::new(),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

pub(crate) struct Sender {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub(crate) struct Receiver {
    shared: Arc<Shared>,
}

struct Shared {
    value: AtomicUsize,
    waker: AtomicWaker,
}

impl Sender {
    /// 代数加一并唤醒接收端，跳过保留的 `CLOSED`。
    pub(crate) fn bump(&self) {
        let prev = self.shared.value.fetch_add(1, Ordering::SeqCst);
        if prev.wrapping_add(1) == CLOSED {
            self.shared.value.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.waker.wake();
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.shared.value.store(CLOSED, Ordering::SeqCst);
        self.shared.waker.wake();
    }
}

impl Receiver {
    /// 注册唤醒器后读取当前值。
    pub(crate) fn load(&self, cx: &mut task::Context<'_>) -> Value {
        self.shared.waker.register(cx.waker());
        self.shared.value.load(Ordering::SeqCst)
    }

    pub(crate) fn peek(&self) -> Value {
        self.shared.value.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::task::noop_waker_ref;

    #[test]
    fn bump_changes_value() {
        let (tx, rx) = channel(1);
        let mut cx = task::Context::from_waker(noop_waker_ref());
        assert_eq!(rx.load(&mut cx), 1);
        tx.bump();
        assert_eq!(rx.peek(), 2);
        drop(tx);
        assert_eq!(rx.peek(), CLOSED);
    }
}
