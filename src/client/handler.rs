//! 响应回调接口
//!
//! 一个 [`AsyncHandler`] 在请求执行期间依次收到状态行、头部与 body 分片，
//! 每个回调都可以返回 [`State::Abort`] 提前结束请求。请求结束时恰好调用
//! 一次 [`on_completed`](AsyncHandler::on_completed)（成功）或
//! [`on_throwable`](AsyncHandler::on_throwable)（失败 / 取消）。
//!
//! 需要观察连接生命周期（建立连接、复用连接、重试）的 handler 额外实现
//! [`ConnectionEvents`]，并通过 [`AsyncHandler::connection_events`] 暴露它。

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri, Version};

use super::request::Request;
use crate::transport::{ChannelId, ConnectTarget};

/// 回调之后请求应当如何继续。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// 继续处理后续事件。
    Continue,
    /// 立即结束请求：调用 `on_completed`，连接被关闭而不是归还连接池。
    Abort,
}

/// 响应的状态行及其上下文。
#[derive(Clone, Debug)]
pub struct ResponseStatus {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) reason: Option<String>,
    pub(crate) uri: Uri,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl ResponseStatus {
    /// 状态码。
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// 协议版本。
    pub fn version(&self) -> Version {
        self.version
    }

    /// 原因短语。
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// 产生该响应的请求 URI（跟随重定向后为最终 URI）。
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// 对端地址。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// 一段响应 body。
#[derive(Clone, Debug)]
pub struct BodyPart {
    pub(crate) chunk: Bytes,
    pub(crate) last: bool,
}

impl BodyPart {
    /// 内容。
    pub fn chunk(&self) -> &Bytes {
        &self.chunk
    }

    /// 是否为最后一段。
    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// 接收一个请求的响应事件。
///
/// 回调在驱动请求的任务上调用，不应阻塞。
pub trait AsyncHandler: Send + 'static {
    /// 请求成功时产出的值。
    type Output: Send + 'static;

    /// 收到状态行。
    fn on_status(&mut self, status: &ResponseStatus) -> State {
        let _ = status;
        State::Continue
    }

    /// 收到全部响应头。
    fn on_headers(&mut self, headers: &HeaderMap) -> State {
        let _ = headers;
        State::Continue
    }

    /// 收到一段 body。
    fn on_body_part(&mut self, part: &BodyPart) -> State {
        let _ = part;
        State::Continue
    }

    /// 请求结束，产出结果。至多被调用一次。
    fn on_completed(&mut self) -> crate::Result<Self::Output>;

    /// 请求失败或被取消。至多被调用一次。
    fn on_throwable(&mut self, err: &crate::Error) {
        let _ = err;
    }

    /// 可选的连接生命周期回调。
    fn connection_events(&mut self) -> Option<&mut dyn ConnectionEvents> {
        None
    }
}

/// 连接生命周期回调，全部可选。
pub trait ConnectionEvents {
    /// 即将建立新连接。
    fn on_connection_open(&mut self, target: &ConnectTarget) {
        let _ = target;
    }

    /// 从连接池取得了一个连接。
    fn on_connection_pooled(&mut self, id: ChannelId) {
        let _ = id;
    }

    /// 连接即将被归还连接池。
    fn on_connection_offer(&mut self, id: ChannelId) {
        let _ = id;
    }

    /// 请求即将写出。
    fn on_request_send(&mut self, request: &Request) {
        let _ = request;
    }

    /// 即将重试。
    fn on_retry(&mut self) {}
}
