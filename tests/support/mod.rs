#![allow(dead_code)]

//! 脚本化的内存传输，用于集成测试。
//!
//! 每条连接把写入的字节解析成请求，请求完整后调用 responder 决定如何应答，
//! 应答按传输层约定以事件推给引擎。

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use courier::transport::{
    event_channel, BoxFuture, Channel, ChannelEvent, ChannelId, ConnectTarget, Connected,
    EventSender, StatusLine, Transport,
};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

/// 服务端看到的一个完整请求。
#[derive(Clone, Debug)]
pub struct Seen {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// 第几条连接（从 0 开始）。
    pub conn: usize,
    /// 第几个请求（从 0 开始，跨连接计数）。
    pub index: usize,
}

/// 对一个请求的应答方式。
#[derive(Clone, Debug)]
pub enum Action {
    /// 完整响应。
    Respond(Reply),
    /// 在状态行之前以 `ConnectionReset` 断开。
    Reset,
    /// 在状态行之前以给定的错误断开。
    Fail(io::ErrorKind),
    /// 在状态行之前关闭连接。
    Close,
    /// 什么也不回。
    Silence,
    /// 只发送状态行与头部，然后沉默。
    HeadersThenSilence(StatusCode),
    /// 发送状态行与头部，然后以 `ConnectionReset` 断开。
    HeadersThenReset(StatusCode),
}

/// 一个完整响应。
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub parts: Vec<Bytes>,
    /// 响应后关闭连接。
    pub close: bool,
    /// 先发送一个 `100 Continue`。
    pub interim: bool,
}

impl Reply {
    pub fn new(status: u16) -> Reply {
        Reply {
            status: StatusCode::from_u16(status).unwrap(),
            headers: Vec::new(),
            parts: Vec::new(),
            close: false,
            interim: false,
        }
    }

    pub fn ok(body: &'static str) -> Reply {
        Reply::new(200).part(body)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Reply {
        self.headers.push((name, value.into()));
        self
    }

    pub fn part(mut self, part: &'static str) -> Reply {
        self.parts.push(Bytes::from_static(part.as_bytes()));
        self
    }

    pub fn bytes(mut self, part: Bytes) -> Reply {
        self.parts.push(part);
        self
    }

    pub fn close(mut self) -> Reply {
        self.close = true;
        self
    }

    pub fn interim(mut self) -> Reply {
        self.interim = true;
        self
    }

    pub fn into_action(self) -> Action {
        Action::Respond(self)
    }
}

type Responder = dyn Fn(&Seen) -> Action + Send + Sync;

/// 脚本化传输，克隆之间共享状态。
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

struct Inner {
    responder: Box<Responder>,
    connect_failures: Mutex<VecDeque<io::ErrorKind>>,
    connects: AtomicUsize,
    requests: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
    targets: Mutex<Vec<ConnectTarget>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> MockTransport
    where
        F: Fn(&Seen) -> Action + Send + Sync + 'static,
    {
        MockTransport {
            inner: Arc::new(Inner {
                responder: Box::new(responder),
                connect_failures: Mutex::new(VecDeque::new()),
                connects: AtomicUsize::new(0),
                requests: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                targets: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 前 `n` 次连接以 `ConnectionRefused` 失败。
    pub fn refuse_first(self, n: usize) -> MockTransport {
        self.fail_connects(io::ErrorKind::ConnectionRefused, n)
    }

    /// 前 `n` 次连接在建立过程中被对端重置。
    pub fn reset_first(self, n: usize) -> MockTransport {
        self.fail_connects(io::ErrorKind::ConnectionReset, n)
    }

    fn fail_connects(self, kind: io::ErrorKind, n: usize) -> MockTransport {
        self.inner
            .connect_failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat(kind).take(n));
        self
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.inner.seen.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.inner.targets.lock().unwrap().clone()
    }

    /// 第 `n` 条连接是否仍然打开。
    pub fn is_open(&self, n: usize) -> bool {
        self.inner.channels.lock().unwrap()[n].is_open()
    }
}

impl Transport for MockTransport {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, io::Result<Connected>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.targets.lock().unwrap().push(target);
            let failure = inner.connect_failures.lock().unwrap().pop_front();
            if let Some(kind) = failure {
                return Err(kind.into());
            }

            let conn = inner.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = event_channel();
            let channel = Arc::new(MockChannel {
                id: ChannelId::next(),
                conn,
                open: AtomicBool::new(true),
                state: Mutex::new(ChannelBuf {
                    buf: BytesMut::new(),
                    events: Some(tx),
                }),
                transport: Arc::downgrade(&inner),
            });
            inner.channels.lock().unwrap().push(channel.clone());
            Ok(Connected {
                channel,
                events: rx,
            })
        })
    }
}

pub struct MockChannel {
    id: ChannelId,
    conn: usize,
    open: AtomicBool,
    state: Mutex<ChannelBuf>,
    transport: std::sync::Weak<Inner>,
}

struct ChannelBuf {
    buf: BytesMut,
    events: Option<EventSender>,
}

impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&self, buf: Bytes) -> BoxFuture<'static, io::Result<()>> {
        if !self.is_open() {
            return Box::pin(async { Err(io::ErrorKind::BrokenPipe.into()) });
        }
        let mut state = self.state.lock().unwrap();
        state.buf.extend_from_slice(&buf);
        while let Some((method, path, headers, body)) = parse_request(&mut state.buf) {
            let inner = match self.transport.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            let index = inner.requests.fetch_add(1, Ordering::SeqCst);
            let seen = Seen {
                method,
                path,
                headers,
                body,
                conn: self.conn,
                index,
            };
            inner.seen.lock().unwrap().push(seen.clone());
            let action = (inner.responder)(&seen);
            self.act(&mut state, action);
        }
        Box::pin(async { Ok(()) })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl MockChannel {
    fn act(&self, state: &mut ChannelBuf, action: Action) {
        let events = match state.events {
            Some(ref events) => events.clone(),
            None => return,
        };
        match action {
            Action::Respond(reply) => {
                if reply.interim {
                    let _ = events.send(ChannelEvent::Status(StatusLine::new(StatusCode::CONTINUE)));
                    let _ = events.send(ChannelEvent::Headers(HeaderMap::new()));
                }
                let mut headers = HeaderMap::new();
                for (name, value) in reply.headers {
                    headers.append(
                        HeaderName::from_static(name),
                        HeaderValue::from_str(&value).unwrap(),
                    );
                }
                if reply.close {
                    headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
                }
                let _ = events.send(ChannelEvent::Status(StatusLine::new(reply.status)));
                let _ = events.send(ChannelEvent::Headers(headers));
                for part in reply.parts {
                    let _ = events.send(ChannelEvent::BodyPart {
                        chunk: part,
                        last: false,
                    });
                }
                let _ = events.send(ChannelEvent::BodyPart {
                    chunk: Bytes::new(),
                    last: true,
                });
                if reply.close {
                    self.hang_up(state, ChannelEvent::Closed);
                }
            }
            Action::Reset => {
                self.hang_up(
                    state,
                    ChannelEvent::Error(io::ErrorKind::ConnectionReset.into()),
                );
            }
            Action::Fail(kind) => self.hang_up(state, ChannelEvent::Error(kind.into())),
            Action::Close => self.hang_up(state, ChannelEvent::Closed),
            Action::Silence => {}
            Action::HeadersThenSilence(status) => {
                let _ = events.send(ChannelEvent::Status(StatusLine::new(status)));
                let _ = events.send(ChannelEvent::Headers(HeaderMap::new()));
            }
            Action::HeadersThenReset(status) => {
                let _ = events.send(ChannelEvent::Status(StatusLine::new(status)));
                let _ = events.send(ChannelEvent::Headers(HeaderMap::new()));
                self.hang_up(
                    state,
                    ChannelEvent::Error(io::ErrorKind::ConnectionReset.into()),
                );
            }
        }
    }

    fn hang_up(&self, state: &mut ChannelBuf, event: ChannelEvent) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(events) = state.events.take() {
            let _ = events.send(event);
        }
    }
}

/// 缓冲区里有一个完整请求时取出并返回。
fn parse_request(buf: &mut BytesMut) -> Option<(Method, String, HeaderMap, Bytes)> {
    let mut slots = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut slots);
    let head_len = match req.parse(buf).unwrap() {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return None,
    };
    let method = Method::from_bytes(req.method.unwrap().as_bytes()).unwrap();
    let path = req.path.unwrap().to_owned();
    let mut headers = HeaderMap::new();
    for h in req.headers.iter() {
        headers.append(
            HeaderName::from_bytes(h.name.as_bytes()).unwrap(),
            HeaderValue::from_bytes(h.value).unwrap(),
        );
    }

    let chunked = headers
        .get(http::header::TRANSFER_ENCODING)
        .map_or(false, |v| v == "chunked");
    let (body, total) = if chunked {
        decode_chunked(&buf[head_len..])?
    } else {
        let len = headers
            .get(http::header::CONTENT_LENGTH)
            .map_or(0, |v| v.to_str().unwrap().parse::<usize>().unwrap());
        if buf.len() < head_len + len {
            return None;
        }
        (Bytes::copy_from_slice(&buf[head_len..head_len + len]), len)
    };
    buf.advance(head_len + total);
    Some((method, path, headers, body))
}

fn decode_chunked(mut src: &[u8]) -> Option<(Bytes, usize)> {
    let start = src.len();
    let mut body = BytesMut::new();
    loop {
        let line = src.windows(2).position(|w| w == b"\r\n")?;
        let size = usize::from_str_radix(std::str::from_utf8(&src[..line]).unwrap(), 16).unwrap();
        src = &src[line + 2..];
        if src.len() < size + 2 {
            return None;
        }
        body.extend_from_slice(&src[..size]);
        src = &src[size + 2..];
        if size == 0 {
            return Some((body.freeze(), start - src.len()));
        }
    }
}
