//! 基于 tokio 的 [`Executor`] 与 [`Timer`] 实现。

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use pin_project_lite::pin_project;

use super::{Executor, Sleep, Timer};

/// 使用 `tokio::spawn` 派发任务的执行器。
#[non_exhaustive]
#[derive(Default, Debug, Clone)]
pub struct TokioExecutor {}

impl TokioExecutor {
    /// 创建一个新的执行器。
    pub fn new() -> Self {
        Self {}
    }
}

impl<Fut> Executor<Fut> for TokioExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        ::tokio::spawn(fut);
    }
}

/// 基于 `tokio::time` 的定时器。
///
/// 在 `tokio::time::pause()` 下同样可用：`now()` 取自 tokio 的时钟。
#[non_exhaustive]
#[derive(Default, Clone, Debug)]
pub struct TokioTimer;

impl TokioTimer {
    /// 创建一个新的定时器。
    pub fn new() -> Self {
        Self {}
    }
}

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep(duration),
        })
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep_until(deadline.into()),
        })
    }

    fn now(&self) -> Instant {
        ::tokio::time::Instant::now().into_std()
    }

    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        if let Some(sleep) = sleep.as_mut().downcast_mut_pin::<TokioSleep>() {
            sleep.reset(new_deadline)
        } else {
            *sleep = self.sleep_until(new_deadline);
        }
    }
}

pin_project! {
    #[derive(Debug)]
    struct TokioSleep {
        #[pin]
        inner: ::tokio::time::Sleep,
    }
}

impl Future for TokioSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl Sleep for TokioSleep {}

impl TokioSleep {
    fn reset(self: Pin<&mut Self>, deadline: Instant) {
        self.project().inner.as_mut().reset(deadline.into());
    }
}
