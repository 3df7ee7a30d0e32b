//! 请求超时调度
//!
//! 每个 [`RequestFuture`] 至多有两个计时任务：
//!
//! - 总超时：请求首次提交时启动，覆盖重定向与重试；
//! - 空闲（读）超时：首次写出后启动，每次到期时检查最近一次活动时间，
//!   如果期间有过活动就把截止时间顺延，否则判定超时。
//!
//! 计时任务通过 oneshot 通道取消：丢弃 [`TimeoutsHolder`] 中的发送端即可，
//! 重复取消没有副作用。到期时以超时错误终止请求（与其他终止原因竞争认领），
//! 并关闭连接。

use std::fmt;
use std::time::Duration;

use futures_util::future::{self, Either};
use tokio::sync::oneshot;

use super::future::RequestFuture;
use crate::common::exec::Exec;
use crate::common::time::Time;
use crate::TimeoutKind;

/// 一个请求的计时任务句柄。
#[derive(Default)]
pub(crate) struct TimeoutsHolder {
    request: Option<oneshot::Sender<()>>,
    idle: Option<oneshot::Sender<()>>,
}

impl TimeoutsHolder {
    /// 取消两个计时任务。
    pub(crate) fn cancel(&mut self) {
        self.request.take();
        self.idle.take();
    }

    fn is_request_armed(&self) -> bool {
        self.request.is_some()
    }

    fn is_idle_armed(&self) -> bool {
        self.idle.is_some()
    }
}

impl fmt::Debug for TimeoutsHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutsHolder")
            .field("request", &self.request.is_some())
            .field("idle", &self.idle.is_some())
            .finish()
    }
}

/// 启动总超时计时。`None` 或已经启动过时什么也不做。
pub(crate) fn schedule_request_timeout<T>(
    fut: &RequestFuture<T>,
    exec: &Exec,
    time: &Time,
    timeout: Option<Duration>,
) where
    T: Send + 'static,
{
    let dur = match timeout {
        Some(dur) if time.is_set() => dur,
        Some(_) => {
            warn!("request timeout ignored, no timer set");
            return;
        }
        None => return,
    };

    let (tx, rx) = oneshot::channel();
    let armed = fut.with_timeouts(|holder| {
        if holder.is_request_armed() {
            return false;
        }
        holder.request = Some(tx);
        true
    });
    if armed != Some(true) {
        return;
    }

    let sleep = time.sleep(dur);
    let fut = fut.clone();
    exec.execute(async move {
        if let Either::Left(..) = future::select(sleep, rx).await {
            expire(&fut, TimeoutKind::Request, dur);
        }
    });
}

/// 启动空闲超时计时。`None` 或已经启动过时什么也不做。
pub(crate) fn schedule_idle_timeout<T>(
    fut: &RequestFuture<T>,
    exec: &Exec,
    time: &Time,
    timeout: Option<Duration>,
) where
    T: Send + 'static,
{
    let dur = match timeout {
        Some(dur) if time.is_set() => dur,
        Some(_) => {
            warn!("read timeout ignored, no timer set");
            return;
        }
        None => return,
    };

    let (tx, mut rx) = oneshot::channel();
    let armed = fut.with_timeouts(|holder| {
        if holder.is_idle_armed() {
            return false;
        }
        holder.idle = Some(tx);
        true
    });
    if armed != Some(true) {
        return;
    }

    let time = time.clone();
    let mut sleep = time.sleep_until(fut.last_touch() + dur);
    let fut = fut.clone();
    exec.execute(async move {
        loop {
            match future::select(&mut sleep, &mut rx).await {
                Either::Left(..) => {
                    let deadline = fut.last_touch() + dur;
                    if deadline <= time.now() {
                        expire(&fut, TimeoutKind::Idle, dur);
                        return;
                    }
                    trace!("idle timeout rescheduled");
                    time.reset(&mut sleep, deadline);
                }
                Either::Right(..) => return,
            }
        }
    });
}

fn expire<T>(fut: &RequestFuture<T>, kind: TimeoutKind, after: Duration)
where
    T: Send + 'static,
{
    let channel = fut.channel();
    let remote = channel
        .as_ref()
        .and_then(|c| c.remote_addr())
        .map(|addr| addr.to_string())
        .or_else(|| {
            fut.partition_key()
                .map(|key| format!("{}:{}", key.host(), key.port()))
        });
    let err = crate::Error::new_timeout(kind, after, remote);
    if fut.abort(err) {
        debug!("{:?} timeout fired after {:?}", kind, after);
    }
    // 已经被其他原因终止时，连接由终止方处理
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handler::AsyncHandler;
    use crate::client::request::Request;
    use crate::rt::tokio::{TokioExecutor, TokioTimer};
    use std::sync::Arc;

    struct Unit;

    impl AsyncHandler for Unit {
        type Output = ();

        fn on_completed(&mut self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (RequestFuture<()>, Exec, Time) {
        let time = Time::Timer(Arc::new(TokioTimer::new()));
        let request = Request::get("http://example.com/").build().unwrap();
        let fut = RequestFuture::new(request, Box::new(Unit), 0, time.clone());
        (fut, Exec::new(TokioExecutor::new()), time)
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_aborts() {
        let (fut, exec, time) = setup();
        schedule_request_timeout(&fut, &exec, &time, Some(Duration::from_millis(50)));
        let err = fut.get().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.timeout_kind(), Some(TimeoutKind::Request));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_is_pushed_back_by_touch() {
        let (fut, exec, time) = setup();
        schedule_idle_timeout(&fut, &exec, &time, Some(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        fut.touch();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fut.is_done());

        let err = fut.get().await.unwrap_err();
        assert_eq!(err.timeout_kind(), Some(TimeoutKind::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_cancels_timers() {
        let (fut, exec, time) = setup();
        schedule_request_timeout(&fut, &exec, &time, Some(Duration::from_millis(50)));
        fut.done();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fut.get().await.is_ok());
    }
}
