//! 定时器 trait
//!
//! 请求的总超时、空闲超时、建立连接超时以及连接池的后台清理都依赖
//! 一个 [`Timer`]：它负责创建 [`Sleep`] future，并提供当前时间。
//!
//! `now()` 可被覆写，这样测试中可以注入模拟时钟；空闲超时的判定
//! （"距上次事件是否已超过阈值"）也使用同一个时钟。
//!
//! # 示例
//!
//! ```
//! use std::{
//!     pin::Pin,
//!     task::{Context, Poll},
//!     time::{Duration, Instant},
//! };
//!
//! use courier::rt::{Sleep, Timer};
//! use pin_project_lite::pin_project;
//!
//! #[derive(Clone, Debug)]
//! pub struct MyTimer;
//!
//! impl Timer for MyTimer {
//!     fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
//!         Box::pin(MySleep {
//!             inner: tokio::time::sleep(duration),
//!         })
//!     }
//!
//!     fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
//!         Box::pin(MySleep {
//!             inner: tokio::time::sleep_until(deadline.into()),
//!         })
//!     }
//! }
//!
//! pin_project! {
//!     pub struct MySleep {
//!         #[pin]
//!         inner: tokio::time::Sleep,
//!     }
//! }
//!
//! impl std::future::Future for MySleep {
//!     type Output = ();
//!
//!     fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
//!         self.project().inner.poll(cx)
//!     }
//! }
//!
//! impl Sleep for MySleep {}
//! ```

use std::{
    any::TypeId,
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// 提供计时能力的 trait。
pub trait Timer {
    /// 返回一个在 `duration` 之后完成的 future。
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>>;

    /// 返回一个在 `deadline` 时刻完成的 future。
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>>;

    /// 返回当前时间。
    ///
    /// 默认实现为 `Instant::now()`。
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// 把一个已有的 `Sleep` 重置到新的截止时间。
    ///
    /// 空闲超时每次被"触碰"后都会调用它。默认实现直接替换为新的 `Sleep`，
    /// 实现者可以借助 [`Sleep::downcast_mut_pin`] 原地复用已有分配。
    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        *sleep = self.sleep_until(new_deadline);
    }
}

/// 由 [`Timer`] 返回的 future。
pub trait Sleep: Send + Sync + Future<Output = ()> {
    #[doc(hidden)]
    /// 私有方法，用于实现下面的向下转型。
    fn __type_id(&self, _: private::Sealed) -> TypeId
    where
        Self: 'static,
    {
        TypeId::of::<Self>()
    }
}

impl dyn Sleep {
    /// 检查底层的具体类型是否为 `T`。
    pub fn is<T>(&self) -> bool
    where
        T: Sleep + 'static,
    {
        self.__type_id(private::Sealed {}) == TypeId::of::<T>()
    }

    /// 将固定的 `dyn Sleep` 向下转型为固定的具体类型 `T`。
    pub fn downcast_mut_pin<T>(self: Pin<&mut Self>) -> Option<Pin<&mut T>>
    where
        T: Sleep + 'static,
    {
        if self.is::<T>() {
            unsafe {
                let inner = Pin::into_inner_unchecked(self);
                Some(Pin::new_unchecked(
                    &mut *(&mut *inner as *mut dyn Sleep as *mut T),
                ))
            }
        } else {
            None
        }
    }
}

mod private {
    #![allow(missing_debug_implementations)]
    pub struct Sealed {}
}
