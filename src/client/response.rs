//! 响应累积
//!
//! [`ResponseAccumulator`] 把 handler 收到的状态行、头部与 body 分片拼装成
//! 一个不可变的 [`Response`]；[`CompletionHandler`] 是基于它的现成 handler。

use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Uri, Version};

use super::handler::{AsyncHandler, BodyPart, ResponseStatus, State};

/// 一个完整接收的响应。
#[derive(Clone)]
pub struct Response {
    status: StatusCode,
    version: Version,
    reason: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    uri: Uri,
    remote_addr: Option<SocketAddr>,
}

impl Response {
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

    /// 响应头。
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 响应 body。
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 以 UTF-8（有损）解码的 body。
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 最终请求 URI。
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// 对端地址。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// 消耗响应，取出 body。
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("uri", &self.uri)
            .finish()
    }
}

/// 把响应事件累积为 [`Response`]。
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    status: Option<ResponseStatus>,
    headers: HeaderMap,
    body: BytesMut,
    complete: bool,
}

impl ResponseAccumulator {
    /// 空的累积器。
    pub fn new() -> ResponseAccumulator {
        ResponseAccumulator::default()
    }

    /// 记录状态行。之前累积的头部与 body 都被丢弃（例如重试后的新响应）。
    pub fn accumulate_status(&mut self, status: &ResponseStatus) {
        self.status = Some(status.clone());
        self.headers.clear();
        self.body.clear();
        self.complete = false;
    }

    /// 记录响应头。
    pub fn accumulate_headers(&mut self, headers: &HeaderMap) {
        self.headers.extend(headers.clone());
    }

    /// 追加一段 body。
    pub fn accumulate_part(&mut self, part: &BodyPart) {
        self.body.extend_from_slice(&part.chunk);
        if part.last {
            self.complete = true;
        }
    }

    /// 是否已收到最后一段 body。
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 构建响应。
    ///
    /// 没有收到状态行时返回错误；收到了状态行但 body 没有完整结束时返回
    /// incomplete-message 错误。
    pub fn build(&mut self) -> crate::Result<Response> {
        let status = self.status.take().ok_or_else(crate::Error::new_incomplete)?;
        if !self.complete {
            return Err(crate::Error::new_incomplete());
        }
        Ok(Response {
            status: status.status,
            version: status.version,
            reason: status.reason,
            headers: std::mem::take(&mut self.headers),
            body: self.body.split().freeze(),
            uri: status.uri,
            remote_addr: status.remote_addr,
        })
    }
}

/// 累积完整响应的 handler，[`Client::execute_request`] 使用它。
///
/// [`Client::execute_request`]: super::Client::execute_request
#[derive(Debug, Default)]
pub struct CompletionHandler {
    acc: ResponseAccumulator,
}

impl CompletionHandler {
    /// 新建。
    pub fn new() -> CompletionHandler {
        CompletionHandler::default()
    }
}

impl AsyncHandler for CompletionHandler {
    type Output = Response;

    fn on_status(&mut self, status: &ResponseStatus) -> State {
        self.acc.accumulate_status(status);
        State::Continue
    }

    fn on_headers(&mut self, headers: &HeaderMap) -> State {
        self.acc.accumulate_headers(headers);
        State::Continue
    }

    fn on_body_part(&mut self, part: &BodyPart) -> State {
        self.acc.accumulate_part(part);
        State::Continue
    }

    fn on_completed(&mut self) -> crate::Result<Response> {
        self.acc.build()
    }
}
