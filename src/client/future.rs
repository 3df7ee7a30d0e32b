//! 单个逻辑请求的状态机与结果槽位
//!
//! 一个 [`RequestFuture`] 同时被三方共享：驱动请求的任务、超时任务，以及
//! 等待结果的调用方。可变状态集中在一把锁后面（`Inner`），只会发生一次的
//! 状态跃迁（终止、完成、回调 `on_throwable`）用原子标志认领。
//!
//! 终止只有一个入口 `terminate`：无论是正常完成、出错、超时还是取消，
//! 谁先认领成功谁就决定结果，其余的一律返回 `false`，什么也不做。

use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use atomic_waker::AtomicWaker;
use tokio::sync::Notify;

use super::handler::AsyncHandler;
use super::pool::PartitionKey;
use super::realm::Realm;
use super::request::Request;
use super::timeout::TimeoutsHolder;
use crate::common::time::Time;
use crate::transport::Channel;

/// 请求与连接之间的关系。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// 还没有连接，或使用新建的连接。
    New,
    /// 使用从连接池取出的连接。
    Pooled,
    /// 重试中，使用重新建立的连接。
    Reconnected,
    /// 已终止。
    Closed,
}

/// 一个正在执行的请求。
///
/// `RequestFuture` 可以廉价克隆，所有克隆指向同一个请求。
pub struct RequestFuture<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    handler: Mutex<Box<dyn AsyncHandler<Output = T>>>,
    inner: Mutex<Inner>,
    slot: Mutex<Option<crate::Result<T>>>,
    slot_cond: Condvar,
    notify: Notify,
    terminated: AtomicWaker,

    done: AtomicBool,
    cancelled: AtomicBool,
    content_processed: AtomicBool,
    on_throwable_called: AtomicBool,
    in_auth: AtomicBool,
    in_proxy_auth: AtomicBool,
    status_received: AtomicBool,
    time: Time,
}

struct Inner {
    target: Request,
    current: Request,
    channel: Option<Arc<dyn Channel>>,
    partition_key: Option<PartitionKey>,
    state: ChannelState,
    current_retry: u32,
    max_retry: u32,
    redirect_count: u32,
    last_touch: Instant,
    keep_alive: bool,
    reuse_channel: bool,
    realm: Option<Realm>,
    proxy_realm: Option<Realm>,
    first_head: Option<CachedHead>,
    body_started: bool,
    timeouts: TimeoutsHolder,
}

/// 首次尝试时编码好的请求头，重试时原样复用。
#[derive(Clone, Debug)]
pub(crate) struct CachedHead {
    pub(crate) head: bytes::Bytes,
    pub(crate) sent_auth: bool,
    pub(crate) sent_proxy_auth: bool,
}

impl<T> RequestFuture<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        request: Request,
        handler: Box<dyn AsyncHandler<Output = T>>,
        max_retry: u32,
        time: Time,
    ) -> RequestFuture<T> {
        let now = time.now();
        RequestFuture {
            shared: Arc::new(Shared {
                handler: Mutex::new(handler),
                inner: Mutex::new(Inner {
                    target: request.clone(),
                    current: request,
                    channel: None,
                    partition_key: None,
                    state: ChannelState::New,
                    current_retry: 0,
                    max_retry,
                    redirect_count: 0,
                    last_touch: now,
                    keep_alive: true,
                    reuse_channel: false,
                    realm: None,
                    proxy_realm: None,
                    first_head: None,
                    body_started: false,
                    timeouts: TimeoutsHolder::default(),
                }),
                slot: Mutex::new(None),
                slot_cond: Condvar::new(),
                notify: Notify::new(),
                terminated: AtomicWaker::new(),
                done: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                content_processed: AtomicBool::new(false),
                on_throwable_called: AtomicBool::new(false),
                in_auth: AtomicBool::new(false),
                in_proxy_auth: AtomicBool::new(false),
                status_received: AtomicBool::new(false),
                time,
            }),
        }
    }

    /// 请求是否已经终止（完成、失败或取消）。
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// 请求是否因 [`cancel`](Self::cancel) 而终止。
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// 取消请求。
    ///
    /// 第一次成功取消返回 `true`：关闭连接，调用一次 `on_throwable`，
    /// 唤醒所有等待者。请求已经终止（包括已经取消）时返回 `false`。
    pub fn cancel(&self) -> bool {
        let err = crate::Error::new_canceled();
        if !self.terminate() {
            return false;
        }
        self.shared.cancelled.store(true, Ordering::Release);
        debug!("request cancelled");
        self.fail(err);
        true
    }

    /// 等待结果。
    ///
    /// 结果被记忆下来，多次调用返回同一个值（或同一个错误）。
    pub async fn get(&self) -> crate::Result<T>
    where
        T: Clone,
    {
        loop {
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.peek() {
                return result;
            }
            notified.await;
        }
    }

    /// 阻塞当前线程直到结果就绪。不要在异步任务中调用。
    pub fn wait(&self) -> crate::Result<T>
    where
        T: Clone,
    {
        let mut slot = self.lock_slot();
        loop {
            if let Some(ref result) = *slot {
                return result.clone();
            }
            slot = self
                .shared
                .slot_cond
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// 最多阻塞 `timeout`；到时仍未就绪返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<crate::Result<T>>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock_slot();
        loop {
            if let Some(ref result) = *slot {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .shared
                .slot_cond
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// 不等待，结果已就绪则返回它。
    pub fn peek(&self) -> Option<crate::Result<T>>
    where
        T: Clone,
    {
        self.lock_slot().clone()
    }

    /// 最初提交的请求。
    pub fn target_request(&self) -> Request {
        self.lock().target.clone()
    }

    /// 当前正在发送的请求（跟随重定向或认证后可能不同于最初的请求）。
    pub fn current_request(&self) -> Request {
        self.lock().current.clone()
    }

    /// 与连接的关系。
    pub fn channel_state(&self) -> ChannelState {
        self.lock().state
    }

    /// 已经进行的重试次数。
    pub fn current_retry(&self) -> u32 {
        self.lock().current_retry
    }

    /// 已经跟随的重定向次数。
    pub fn redirect_count(&self) -> u32 {
        self.lock().redirect_count
    }

    // ===== 以下只供请求驱动与超时任务使用 =====

    /// 认领终止权：取消计时器，标记为 `Closed`，唤醒驱动任务。
    ///
    /// 只有第一次调用返回 `true`。
    fn terminate(&self) -> bool {
        if self.shared.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        {
            let mut inner = self.lock();
            inner.timeouts.cancel();
            inner.state = ChannelState::Closed;
        }
        self.shared.terminated.wake();
        true
    }

    /// 正常完成：计算一次结果并唤醒等待者。
    ///
    /// 返回是否由本次调用认领了终止；返回 `false` 时连接已被终止方关闭，
    /// 不能再归还连接池。
    pub(crate) fn done(&self) -> bool {
        if !self.terminate() {
            return false;
        }
        // 连接交还给驱动任务处理（归还连接池或关闭），这里只解除关联
        drop(self.lock().channel.take());
        if !self.shared.content_processed.swap(true, Ordering::AcqRel) {
            let result = self.lock_handler().on_completed();
            if let Err(ref err) = result {
                self.throwable(err);
            }
            self.complete(result);
        }
        true
    }

    /// 以错误终止。请求已经终止时返回 `false`。
    ///
    /// 连接会被关闭。
    pub(crate) fn abort(&self, err: crate::Error) -> bool {
        if !self.terminate() {
            return false;
        }
        debug!("request aborted: {:?}", err);
        self.fail(err);
        true
    }

    fn fail(&self, err: crate::Error) {
        let channel = self.lock().channel.take();
        if let Some(channel) = channel {
            channel.close();
        }
        self.shared.content_processed.store(true, Ordering::Release);
        self.throwable(&err);
        self.complete(Err(err));
    }

    fn throwable(&self, err: &crate::Error) {
        if !self.shared.on_throwable_called.swap(true, Ordering::AcqRel) {
            self.lock_handler().on_throwable(err);
        }
    }

    fn complete(&self, result: crate::Result<T>) {
        {
            let mut slot = self.lock_slot();
            if slot.is_none() {
                *slot = Some(result);
            }
        }
        self.shared.slot_cond.notify_all();
        self.shared.notify.notify_waiters();
    }

    /// 请求终止时就绪。只能有一个轮询者（驱动任务）。
    pub(crate) fn poll_terminated(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.shared.terminated.register(cx.waker());
        if self.is_done() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// 在请求未终止时访问 handler。
    ///
    /// 持有 handler 锁期间检查终止标志，终止之后不会再有任何事件交给 handler。
    pub(crate) fn with_handler<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn AsyncHandler<Output = T>) -> R,
    {
        let mut handler = self.lock_handler();
        if self.is_done() {
            return None;
        }
        Some(f(&mut **handler))
    }

    /// 关联当前使用的连接。请求已经终止时关闭该连接并返回 `false`。
    pub(crate) fn attach_channel(&self, channel: Arc<dyn Channel>, key: PartitionKey) -> bool {
        {
            let mut inner = self.lock();
            if !self.is_done() {
                inner.channel = Some(channel);
                inner.partition_key = Some(key);
                return true;
            }
        }
        channel.close();
        false
    }

    pub(crate) fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.lock().channel.clone()
    }

    pub(crate) fn partition_key(&self) -> Option<PartitionKey> {
        self.lock().partition_key.clone()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        let mut inner = self.lock();
        if inner.state != ChannelState::Closed {
            inner.state = state;
        }
    }

    /// 能否在新连接上重放当前请求。
    pub(crate) fn is_replay_possible(&self) -> bool {
        if self.is_done()
            || self.shared.status_received.load(Ordering::Acquire)
            || self.shared.in_auth.load(Ordering::Acquire)
            || self.shared.in_proxy_auth.load(Ordering::Acquire)
        {
            return false;
        }
        let inner = self.lock();
        if inner.body_started && !inner.current.is_replayable() {
            return false;
        }
        let secure = inner
            .partition_key
            .as_ref()
            .map_or(false, PartitionKey::is_secure);
        let open = inner.channel.as_ref().map_or(false, |c| c.is_open());
        !(secure && open)
    }

    /// 重试计数加一，返回是否仍在预算内。
    pub(crate) fn increment_retry_and_check(&self) -> bool {
        let mut inner = self.lock();
        if inner.max_retry == 0 {
            return false;
        }
        inner.current_retry += 1;
        inner.current_retry <= inner.max_retry
    }

    pub(crate) fn increment_and_get_redirect_count(&self) -> u32 {
        let mut inner = self.lock();
        inner.redirect_count += 1;
        inner.redirect_count
    }

    /// 开始发送一个新的请求（重定向或认证重放）。
    ///
    /// 缓存的请求头作废，body 状态与状态行标志复位。
    pub(crate) fn set_current_request(&self, request: Request) {
        let mut inner = self.lock();
        inner.current = request;
        inner.first_head = None;
        inner.body_started = false;
        drop(inner);
        self.shared.status_received.store(false, Ordering::Release);
    }

    pub(crate) fn first_head(&self) -> Option<CachedHead> {
        self.lock().first_head.clone()
    }

    pub(crate) fn set_first_head(&self, head: CachedHead) {
        self.lock().first_head = Some(head);
    }

    pub(crate) fn mark_body_started(&self) {
        self.lock().body_started = true;
    }

    pub(crate) fn set_status_received(&self) {
        self.shared.status_received.store(true, Ordering::Release);
    }

    pub(crate) fn is_in_auth(&self) -> bool {
        self.shared.in_auth.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_auth(&self, value: bool) {
        self.shared.in_auth.store(value, Ordering::Release);
    }

    pub(crate) fn is_in_proxy_auth(&self) -> bool {
        self.shared.in_proxy_auth.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_proxy_auth(&self, value: bool) {
        self.shared.in_proxy_auth.store(value, Ordering::Release);
    }

    pub(crate) fn realm(&self) -> Option<Realm> {
        self.lock().realm.clone()
    }

    pub(crate) fn set_realm(&self, realm: Option<Realm>) {
        self.lock().realm = realm;
    }

    pub(crate) fn proxy_realm(&self) -> Option<Realm> {
        self.lock().proxy_realm.clone()
    }

    pub(crate) fn set_proxy_realm(&self, realm: Option<Realm>) {
        self.lock().proxy_realm = realm;
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.lock().keep_alive
    }

    pub(crate) fn set_keep_alive(&self, keep_alive: bool) {
        self.lock().keep_alive = keep_alive;
    }

    pub(crate) fn reuse_channel(&self) -> bool {
        self.lock().reuse_channel
    }

    pub(crate) fn set_reuse_channel(&self, reuse: bool) {
        self.lock().reuse_channel = reuse;
    }

    /// 记录一次活动，推迟空闲超时。
    pub(crate) fn touch(&self) {
        let now = self.shared.time.now();
        self.lock().last_touch = now;
    }

    pub(crate) fn last_touch(&self) -> Instant {
        self.lock().last_touch
    }

    pub(crate) fn with_timeouts<R>(&self, f: impl FnOnce(&mut TimeoutsHolder) -> R) -> Option<R> {
        let mut inner = self.lock();
        if self.is_done() {
            return None;
        }
        Some(f(&mut inner.timeouts))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<crate::Result<T>>> {
        self.shared.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_handler(&self) -> MutexGuard<'_, Box<dyn AsyncHandler<Output = T>>> {
        self.shared.handler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Clone for RequestFuture<T> {
    fn clone(&self) -> Self {
        RequestFuture {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for RequestFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFuture")
            .field("done", &self.shared.done.load(Ordering::Relaxed))
            .field("cancelled", &self.shared.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
