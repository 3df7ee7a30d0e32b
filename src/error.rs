//! courier 错误与结果类型模块
//!
//! 请求生命周期中可能出现的所有失败（建立连接失败、连接数超限、I/O 错误、
//! 对端提前关闭、超时、取消、重定向次数超限、认证失败、用户代码误用等）
//! 都统一封装在 [`Error`] 中。调用者通过 `is_*` 方法判断错误类别，
//! 内部分类（`Kind`、`Parse`、`User`）不对外暴露。
//!
//! ## 可克隆
//!
//! [`RequestFuture`](crate::client::RequestFuture) 会把终止错误记忆下来，
//! 之后每次 `get()` / `wait()` 都要重新返回同一个错误，因此 `Error` 实现了
//! `Clone`：原因链以 `Arc` 共享，克隆只是增加引用计数。

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// courier 方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误原因，`Arc` 使其可以随 `Error` 一起被克隆。
type Cause = Arc<dyn StdError + Send + Sync>;

/// 表示执行一个 HTTP 请求的过程中可能发生的错误。
///
/// # 格式化
///
/// `Display` 只打印当前层级的描述，不包含 source 链。
/// 具体措辞未作约定，可能在任何版本中调整，**不要依赖它**。
///
/// # Source
///
/// 错误可能由另一个错误引起（例如 `std::io::Error`），
/// 可以通过 `Error::source()` 以类型擦除的方式访问。
#[derive(Clone)]
pub struct Error {
    // Box 使 Error 在栈上只占一个指针宽度，Result<T, Error> 因此保持小巧。
    inner: Box<ErrorImpl>,
}

#[derive(Clone)]
struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Clone, Debug)]
pub(super) enum Kind {
    /// 响应或 URI 解析错误
    Parse(Parse),
    /// 调用方误用 API
    User(User),
    /// 建立连接失败
    Connect,
    /// 超过全局或每主机连接数上限
    TooManyConnections,
    /// 客户端或连接池已关闭
    Closed,
    /// 读写通道时的 `io::Error`
    Io,
    /// 对端在响应状态行到达前关闭了连接
    RemotelyClosed,
    /// 连接在 body 结束前关闭
    IncompleteMessage,
    /// 超时，原因中携带 `TimedOut`
    Timeout,
    /// 请求被取消
    Canceled,
    /// 重定向次数超过上限
    TooManyRedirects,
    /// 凭据已发送但服务端再次质询
    AuthFailed,
    /// 从请求体生成器读取数据失败
    Body,
    /// 向连接写入请求体失败
    BodyWrite,
}

#[derive(Clone, Debug)]
pub(super) enum Parse {
    Uri,
    Location,
    Status,
    Header,
    TooLarge,
}

#[derive(Clone, Debug)]
pub(super) enum User {
    /// 在最后一个分片之后继续 feed
    FeedAfterLast,
    /// 有界队列已满
    BodyQueueFull,
    /// 请求缺少 scheme / host 等必要部分
    InvalidRequest,
    /// handler 的 `on_completed` 返回了错误
    Handler,
}

/// 触发超时的计时器种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// 建立连接超时
    Connect,
    /// 整个请求的总时长超时
    Request,
    /// 连接空闲（读）超时
    Idle,
}

/// 哨兵类型：放在错误链中标识超时，并携带超时的细节。
#[derive(Debug)]
pub(crate) struct TimedOut {
    kind: TimeoutKind,
    after: Duration,
    remote: Option<String>,
}

impl Error {
    /// 如果这是一个解析错误（URI、状态行、头部、Location），返回 `true`。
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// 如果此错误由调用方代码引起，返回 `true`。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 如果请求被取消，返回 `true`。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 如果客户端（或连接池）已关闭，返回 `true`。
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    /// 如果建立连接失败，返回 `true`。
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// 如果连接数达到了配置的上限，返回 `true`。
    pub fn is_too_many_connections(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyConnections)
    }

    /// 如果这是一个通道 I/O 错误，返回 `true`。
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// 如果对端在任何响应字节到达之前关闭了连接，返回 `true`。
    pub fn is_remotely_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::RemotelyClosed)
    }

    /// 如果连接在响应 body 完成之前关闭，返回 `true`。
    ///
    /// 这意味着 body 分片流被中途放弃，收到的内容是不完整的。
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// 如果错误由超时引起，返回 `true`。
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout) || self.find_source::<TimedOut>().is_some()
    }

    /// 如果是超时错误，返回触发它的计时器种类。
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        self.find_source::<TimedOut>().map(|t| t.kind)
    }

    /// 如果重定向次数超过了 `max_redirects`，返回 `true`。
    pub fn is_too_many_redirects(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRedirects)
    }

    /// 如果凭据已经发送过而服务端（或代理）再次质询，返回 `true`。
    pub fn is_auth_failed(&self) -> bool {
        matches!(self.inner.kind, Kind::AuthFailed)
    }

    /// 如果读取请求体生成器时出错，返回 `true`。
    pub fn is_body(&self) -> bool {
        matches!(self.inner.kind, Kind::Body)
    }

    /// 如果向连接写入请求体时出错，返回 `true`。
    pub fn is_body_write(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyWrite)
    }

    /// 如果有界的 feedable body 队列已满、拒绝了本次 feed，返回 `true`。
    pub fn is_body_queue_full(&self) -> bool {
        matches!(self.inner.kind, Kind::User(User::BodyQueueFull))
    }

    /// 如果在最后一个分片之后又 feed 了数据，返回 `true`。
    pub fn is_feed_after_last(&self) -> bool {
        matches!(self.inner.kind, Kind::User(User::FeedAfterLast))
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Box<dyn StdError + Send + Sync>>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(Arc::from(cause.into()));
        self
    }

    /// 沿 source 链查找特定类型的错误。
    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // else
        None
    }

    /// 返回链上第一个 `io::Error`（如果有）。
    pub(crate) fn io_source(&self) -> Option<&std::io::Error> {
        self.find_source::<std::io::Error>()
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::Closed)
    }

    pub(crate) fn new_connect<E: Into<Box<dyn StdError + Send + Sync>>>(cause: E) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn new_too_many_connections(msg: String) -> Error {
        Error::new(Kind::TooManyConnections).with(msg)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_remotely_closed() -> Error {
        Error::new(Kind::RemotelyClosed)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_timeout(kind: TimeoutKind, after: Duration, remote: Option<String>) -> Error {
        Error::new(Kind::Timeout).with(TimedOut {
            kind,
            after,
            remote,
        })
    }

    pub(crate) fn new_too_many_redirects(max: u32) -> Error {
        Error::new(Kind::TooManyRedirects).with(format!("maximum redirect reached: {}", max))
    }

    pub(crate) fn new_auth_failed(status: http::StatusCode) -> Error {
        Error::new(Kind::AuthFailed).with(format!(
            "{} received after credentials were already sent",
            status
        ))
    }

    pub(crate) fn new_body<E: Into<Box<dyn StdError + Send + Sync>>>(cause: E) -> Error {
        Error::new(Kind::Body).with(cause)
    }

    pub(crate) fn new_body_write(cause: std::io::Error) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(crate) fn new_user_feed_after_last() -> Error {
        Error::new_user(User::FeedAfterLast)
    }

    pub(crate) fn new_user_body_queue_full(capacity: usize) -> Error {
        Error::new_user(User::BodyQueueFull).with(format!("capacity {} reached", capacity))
    }

    pub(crate) fn new_user_invalid_request<E: Into<Box<dyn StdError + Send + Sync>>>(
        cause: E,
    ) -> Error {
        Error::new_user(User::InvalidRequest).with(cause)
    }

    /// 把 handler 返回的任意错误包装为 courier 错误。
    pub fn new_handler<E: Into<Box<dyn StdError + Send + Sync>>>(cause: E) -> Error {
        Error::new_user(User::Handler).with(cause)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Uri) => "invalid URI",
            Kind::Parse(Parse::Location) => "invalid redirect location",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::User(User::FeedAfterLast) => "body fed after the last chunk",
            Kind::User(User::BodyQueueFull) => "body queue is full",
            Kind::User(User::InvalidRequest) => "invalid request",
            Kind::User(User::Handler) => "error from user's handler",
            Kind::Connect => "error trying to connect",
            Kind::TooManyConnections => "too many connections",
            Kind::Closed => "client closed",
            Kind::Io => "connection error",
            Kind::RemotelyClosed => "remotely closed",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::Timeout => "operation timed out",
            Kind::Canceled => "operation was canceled",
            Kind::TooManyRedirects => "too many redirects",
            Kind::AuthFailed => "authentication failed",
            Kind::Body => "error reading a body from the body generator",
            Kind::BodyWrite => "error writing a body to connection",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("courier::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl Parse {
    pub(crate) fn location() -> Self {
        Parse::Location
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token
            | httparse::Error::Version => Parse::Header,
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
        }
    }
}

impl From<http::uri::InvalidUri> for Parse {
    fn from(_: http::uri::InvalidUri) -> Parse {
        Parse::Uri
    }
}

impl From<http::uri::InvalidUriParts> for Parse {
    fn from(_: http::uri::InvalidUriParts) -> Parse {
        Parse::Uri
    }
}

impl From<http::status::InvalidStatusCode> for Parse {
    fn from(_: http::status::InvalidStatusCode) -> Parse {
        Parse::Status
    }
}

impl From<http::header::InvalidHeaderValue> for Parse {
    fn from(_: http::header::InvalidHeaderValue) -> Parse {
        Parse::Header
    }
}

impl From<http::header::InvalidHeaderName> for Parse {
    fn from(_: http::header::InvalidHeaderName) -> Parse {
        Parse::Header
    }
}

// ===== impl TimedOut ====

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            TimeoutKind::Connect => "Connect",
            TimeoutKind::Request => "Request",
            TimeoutKind::Idle => "Read",
        };
        match self.remote {
            Some(ref remote) => write!(
                f,
                "{} timeout to {} after {} ms",
                what,
                remote,
                self.after.as_millis()
            ),
            None => write!(f, "{} timeout after {} ms", what, self.after.as_millis()),
        }
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn timeout_carries_kind_and_message() {
        let err = Error::new_timeout(
            TimeoutKind::Idle,
            Duration::from_millis(100),
            Some("127.0.0.1:8080".to_owned()),
        );
        assert!(err.is_timeout());
        assert_eq!(err.timeout_kind(), Some(TimeoutKind::Idle));
        let source = err.source().expect("timeout source");
        assert_eq!(
            source.to_string(),
            "Read timeout to 127.0.0.1:8080 after 100 ms"
        );
    }

    #[test]
    fn clone_shares_cause() {
        let err = Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        let copy = err.clone();
        assert!(copy.is_io());
        assert_eq!(
            copy.io_source().map(|e| e.kind()),
            Some(std::io::ErrorKind::ConnectionReset)
        );
    }

    #[test]
    fn parse_from_httparse() {
        let err: Error = Parse::from(httparse::Error::Status).into();
        assert!(err.is_parse());
        assert_eq!(err.to_string(), "invalid HTTP status-code parsed");
    }
}
