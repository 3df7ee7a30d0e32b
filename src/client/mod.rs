//! HTTP 客户端模块
//!
//! [`Client`] 是请求生命周期引擎的入口。它持有配置、传输层与连接池，
//! 为每个提交的请求派发一个驱动任务并返回 [`RequestFuture`]。
//!
//! ## 子模块结构
//!
//! - [`pool`]：按分区键划分的连接池。
//! - `config`：[`Config`] 与 [`Builder`]。
//! - `request` / `response`：不可变的请求描述与累积出的响应。
//! - `handler`：[`AsyncHandler`] 回调接口与可选的 [`ConnectionEvents`]。
//! - `future`：单个请求的状态机与结果槽位。
//! - `sender`：编排者，负责连接复用、重试、重定向与认证。
//! - `timeout`：总超时与空闲超时调度。
//! - `filter`：决定其他 I/O 错误是否重放请求的 [`IoExceptionFilter`]。
//! - `realm` / `proxy`：认证凭据与代理。
//!
//! ## 示例
//!
//! ```no_run
//! # #[cfg(feature = "tcp")]
//! # async fn run() -> courier::Result<()> {
//! use courier::client::{Builder, Request};
//! use courier::rt::tokio::{TokioExecutor, TokioTimer};
//! use courier::transport::tcp::TcpTransport;
//!
//! let client = Builder::new(TokioExecutor::new())
//!     .timer(TokioTimer::new())
//!     .follow_redirect(true)
//!     .build(TcpTransport::new());
//!
//! let request = Request::get("http://example.com/").build()?;
//! let response = client.execute_request(request).get().await?;
//! println!("{} {}", response.status(), response.text());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

pub use self::config::{Builder, Config};
pub use self::filter::IoExceptionFilter;
pub use self::future::{ChannelState, RequestFuture};
pub use self::handler::{AsyncHandler, BodyPart, ConnectionEvents, ResponseStatus, State};
pub use self::pool::{Connection, ConnectionPool, LeaseStrategy, PartitionKey};
pub use self::proxy::ProxyServer;
pub use self::realm::{AuthScheme, Realm};
pub use self::request::{Cookie, Request, RequestBuilder};
pub use self::response::{CompletionHandler, Response, ResponseAccumulator};

mod config;
mod filter;
mod future;
mod handler;
pub mod pool;
mod proxy;
mod realm;
mod redirect;
mod request;
mod response;
mod sender;
mod timeout;
mod wire;

use self::sender::RequestSender;

/// 异步 HTTP 客户端。
///
/// `Client` 可以廉价克隆，克隆之间共享配置与连接池。
#[derive(Clone)]
pub struct Client {
    sender: Arc<RequestSender>,
}

impl Client {
    /// 以给定执行器开始构建客户端。
    pub fn builder<E>(executor: E) -> Builder
    where
        E: crate::rt::Executor<std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>>
            + Send
            + Sync
            + 'static,
    {
        Builder::new(executor)
    }

    /// 执行请求，响应事件交给 `handler`。
    ///
    /// 立即返回；请求在执行器上被驱动。
    pub fn execute<H>(&self, request: Request, handler: H) -> RequestFuture<H::Output>
    where
        H: AsyncHandler,
    {
        self.sender.send(request, handler)
    }

    /// 执行请求并累积完整响应。
    pub fn execute_request(&self, request: Request) -> RequestFuture<Response> {
        self.execute(request, CompletionHandler::new())
    }

    /// 生效配置。
    pub fn config(&self) -> &Config {
        self.sender.config()
    }

    /// 连接池。
    pub fn pool(&self) -> &ConnectionPool {
        self.sender.pool()
    }

    /// 关闭客户端：销毁连接池，之后提交的请求立即以 closed 错误失败。
    ///
    /// 已经在执行的请求不受影响，但它们的连接不会再被放回连接池。
    pub fn close(&self) {
        self.sender.close()
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", self.sender.config())
            .field("pool", self.sender.pool())
            .finish()
    }
}
