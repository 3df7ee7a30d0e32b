//! 运行时抽象
//!
//! courier 不直接依赖某个具体的异步运行时。请求驱动任务与超时任务通过
//! [`Executor`] 派发，计时通过 [`Timer`] 完成。
//!
//! 启用 `tokio` feature 后，[`tokio`] 子模块提供了基于 tokio 的现成实现：
//!
//! ```ignore
//! use courier::rt::tokio::{TokioExecutor, TokioTimer};
//!
//! let client = courier::client::Client::builder(TokioExecutor::new())
//!     .timer(TokioTimer::new())
//!     .build(transport);
//! ```

mod timer;

pub use self::timer::{Sleep, Timer};

cfg_tokio! {
    pub mod tokio;
}

/// Future 执行器 trait。
///
/// 客户端会为每个请求派发一个驱动任务，并为每个启用的超时派发一个计时任务，
/// 所以执行器必须能并发运行这些 future。
///
/// # 示例
///
/// ```
/// # use courier::rt::Executor;
/// # use std::future::Future;
/// #[derive(Clone)]
/// struct SpawnExecutor;
///
/// impl<F> Executor<F> for SpawnExecutor
/// where
///     F: Future + Send + 'static,
///     F::Output: Send + 'static,
/// {
///     fn execute(&self, future: F) {
///         tokio::spawn(future);
///     }
/// }
/// ```
pub trait Executor<Fut> {
    /// 将 future 放入执行器中运行。
    fn execute(&self, fut: Fut);
}
