//! 基于 tokio `TcpStream` 的明文 HTTP/1.1 传输
//!
//! 每条连接有两个后台任务：
//!
//! - 写任务按提交顺序写出 [`Channel::write`] 交来的字节，并逐个确认；
//! - 读任务用 `httparse` 解析响应头，按 `Content-Length`、chunked 编码或
//!   连接关闭界定 body，把结果作为 [`ChannelEvent`] 推给引擎。
//!
//! HEAD 请求、`CONNECT` 的 2xx 响应、1xx / 204 / 304 响应没有 body。
//! 读任务通过识别写出的请求行来判断对应请求的方法。
//!
//! 不支持 TLS：连接 https 目标会失败。

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::future::{self, Either};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};

use super::{
    event_channel, BoxFuture, Channel, ChannelEvent, ChannelId, ConnectTarget, Connected,
    EventSender, StatusLine, Transport,
};

const MAX_HEADERS: usize = 100;
const MAX_HEAD_SIZE: usize = 64 * 1024;
const READ_BUF_SIZE: usize = 8 * 1024;

/// 明文 TCP 传输。
#[derive(Clone, Debug, Default)]
pub struct TcpTransport {
    nodelay: bool,
}

impl TcpTransport {
    /// 新建，默认开启 `TCP_NODELAY`。
    pub fn new() -> TcpTransport {
        TcpTransport { nodelay: true }
    }

    /// 设置 `TCP_NODELAY`。
    pub fn set_nodelay(&mut self, nodelay: bool) -> &mut TcpTransport {
        self.nodelay = nodelay;
        self
    }
}

impl Transport for TcpTransport {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, io::Result<Connected>> {
        let nodelay = self.nodelay;
        Box::pin(async move {
            if target.secure {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "TLS is not supported by TcpTransport",
                ));
            }
            let stream = connect_stream(&target).await?;
            stream.set_nodelay(nodelay)?;
            let remote = stream.peer_addr().ok();
            trace!("tcp connected to {} ({:?})", target, remote);

            let (read, write) = stream.into_split();
            let (events_tx, events_rx) = event_channel();
            let (write_tx, write_rx) = mpsc::unbounded_channel();
            let shared = Arc::new(Shared {
                open: AtomicBool::new(true),
                closed: Notify::new(),
                pending: Mutex::new(VecDeque::new()),
            });

            tokio::spawn(write_loop(write, write_rx, shared.clone()));
            tokio::spawn(read_loop(read, events_tx, shared.clone()));

            let channel = TcpChannel {
                id: ChannelId::next(),
                writes: write_tx,
                shared,
                remote,
            };
            Ok(Connected {
                channel: Arc::new(channel),
                events: events_rx,
            })
        })
    }
}

async fn connect_stream(target: &ConnectTarget) -> io::Result<TcpStream> {
    let local = match target.local_addr {
        Some(local) => local,
        None => return TcpStream::connect((target.host.as_str(), target.port)).await,
    };

    let host = target.host.clone();
    let port = target.port;
    let addrs = tokio::task::spawn_blocking(move || {
        (host.as_str(), port)
            .to_socket_addrs()
            .map(|iter| iter.collect::<Vec<_>>())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

    let mut last_err = None;
    for addr in addrs.into_iter().filter(|a| a.is_ipv4() == local.is_ipv4()) {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(SocketAddr::new(local, 0))?;
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address of {} matches local address {}", target, local),
        )
    }))
}

struct Shared {
    open: AtomicBool,
    closed: Notify,
    pending: Mutex<VecDeque<RequestKind>>,
}

impl Shared {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closed.notify_waiters();
        }
    }

    fn next_kind(&self) -> RequestKind {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(RequestKind::Normal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Normal,
    Head,
    Connect,
}

type Write = (Bytes, oneshot::Sender<io::Result<()>>);

struct TcpChannel {
    id: ChannelId,
    writes: mpsc::UnboundedSender<Write>,
    shared: Arc<Shared>,
    remote: Option<SocketAddr>,
}

impl Channel for TcpChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&self, buf: Bytes) -> BoxFuture<'static, io::Result<()>> {
        if !self.shared.is_open() {
            return Box::pin(async { Err(io::ErrorKind::NotConnected.into()) });
        }
        if let Some(kind) = request_kind(&buf) {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(kind);
        }
        let (tx, rx) = oneshot::channel();
        if self.writes.send((buf, tx)).is_err() {
            return Box::pin(async { Err(io::ErrorKind::BrokenPipe.into()) });
        }
        Box::pin(async move {
            match rx.await {
                Ok(res) => res,
                Err(_) => Err(io::ErrorKind::BrokenPipe.into()),
            }
        })
    }

    fn close(&self) {
        self.shared.close();
    }

    fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn start_tls(&self, _host: &str) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TLS is not supported by TcpTransport",
            ))
        })
    }
}

impl fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpChannel")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

/// 识别请求行，返回请求的种类；不是请求头时返回 `None`。
fn request_kind(buf: &[u8]) -> Option<RequestKind> {
    let line_end = buf.windows(2).take(8192).position(|w| w == b"\r\n")?;
    let line = &buf[..line_end];
    if !(line.ends_with(b" HTTP/1.1") || line.ends_with(b" HTTP/1.0")) {
        return None;
    }
    let method_end = line.iter().position(|&b| b == b' ')?;
    let method = &line[..method_end];
    if method.is_empty() || !method.iter().all(u8::is_ascii_uppercase) {
        return None;
    }
    Some(match method {
        b"HEAD" => RequestKind::Head,
        b"CONNECT" => RequestKind::Connect,
        _ => RequestKind::Normal,
    })
}

async fn write_loop(
    mut io: OwnedWriteHalf,
    mut writes: mpsc::UnboundedReceiver<Write>,
    shared: Arc<Shared>,
) {
    loop {
        let mut closed = pin!(shared.closed.notified());
        closed.as_mut().enable();
        if !shared.is_open() {
            break;
        }
        let (buf, ack) = match future::select(pin!(writes.recv()), closed).await {
            Either::Left((Some(write), _)) => write,
            Either::Left((None, _)) | Either::Right(..) => break,
        };
        let res = io.write_all(&buf).await;
        if let Err(ref err) = res {
            debug!("tcp write error: {}", err);
            shared.close();
        }
        let _ = ack.send(res);
    }
    let _ = io.shutdown().await;
}

enum Reading {
    Head,
    Length(u64),
    Chunked(Chunked),
    Eof,
}

enum Chunked {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

async fn read_loop(mut io: OwnedReadHalf, events: EventSender, shared: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
    let mut reading = Reading::Head;
    loop {
        match decode(&mut buf, &mut reading, &events, &shared) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => {
                debug!("tcp read error: {}", err);
                let _ = events.send(ChannelEvent::Error(err));
                break;
            }
        }

        let mut closed = pin!(shared.closed.notified());
        closed.as_mut().enable();
        if !shared.is_open() {
            break;
        }
        buf.reserve(READ_BUF_SIZE);
        let n = match future::select(pin!(io.read_buf(&mut buf)), closed).await {
            Either::Left((Ok(n), _)) => n,
            Either::Left((Err(err), _)) => {
                let _ = events.send(ChannelEvent::Error(err));
                break;
            }
            Either::Right(..) => break,
        };
        if n == 0 {
            if let Reading::Eof = reading {
                let _ = events.send(ChannelEvent::BodyPart {
                    chunk: Bytes::new(),
                    last: true,
                });
            }
            let _ = events.send(ChannelEvent::Closed);
            break;
        }
    }
    shared.close();
}

/// 尽可能多地解析已缓冲的数据。取得进展返回 `true`，需要更多数据返回 `false`。
fn decode(
    buf: &mut BytesMut,
    reading: &mut Reading,
    events: &EventSender,
    shared: &Shared,
) -> io::Result<bool> {
    match *reading {
        Reading::Head => {
            if buf.is_empty() {
                return Ok(false);
            }
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut headers);
            let len = match res.parse(buf).map_err(invalid_data)? {
                httparse::Status::Complete(len) => len,
                httparse::Status::Partial => {
                    if buf.len() >= MAX_HEAD_SIZE {
                        return Err(invalid_data("message head is too large"));
                    }
                    return Ok(false);
                }
            };

            let status = StatusCode::from_u16(res.code.unwrap_or(0)).map_err(invalid_data)?;
            let version = if res.version == Some(0) {
                Version::HTTP_10
            } else {
                Version::HTTP_11
            };
            let mut map = HeaderMap::with_capacity(res.headers.len());
            for header in res.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(invalid_data)?;
                let value = HeaderValue::from_bytes(header.value).map_err(invalid_data)?;
                map.append(name, value);
            }
            let line = StatusLine {
                version,
                status,
                reason: res.reason.filter(|r| !r.is_empty()).map(str::to_owned),
            };
            buf.advance(len);

            let informational = status.is_informational();
            let kind = if informational {
                RequestKind::Normal
            } else {
                shared.next_kind()
            };
            let next = if informational {
                None
            } else if kind == RequestKind::Head
                || (kind == RequestKind::Connect && status.is_success())
                || status == StatusCode::NO_CONTENT
                || status == StatusCode::NOT_MODIFIED
            {
                Some(Reading::Length(0))
            } else if crate::headers::transfer_encoding_is_chunked(&map) {
                Some(Reading::Chunked(Chunked::Size))
            } else if let Some(len) = crate::headers::content_length_parse_all(&map) {
                Some(Reading::Length(len))
            } else if map.contains_key(http::header::CONTENT_LENGTH) {
                return Err(invalid_data("invalid content-length"));
            } else {
                Some(Reading::Eof)
            };

            emit(events, ChannelEvent::Status(line))?;
            emit(events, ChannelEvent::Headers(map))?;
            match next {
                None => {}
                Some(Reading::Length(0)) => {
                    emit(
                        events,
                        ChannelEvent::BodyPart {
                            chunk: Bytes::new(),
                            last: true,
                        },
                    )?;
                }
                Some(next) => *reading = next,
            }
            Ok(true)
        }
        Reading::Length(ref mut remaining) => {
            if buf.is_empty() {
                return Ok(false);
            }
            let n = (*remaining).min(buf.len() as u64) as usize;
            *remaining -= n as u64;
            let last = *remaining == 0;
            emit(
                events,
                ChannelEvent::BodyPart {
                    chunk: buf.split_to(n).freeze(),
                    last,
                },
            )?;
            if last {
                *reading = Reading::Head;
            }
            Ok(true)
        }
        Reading::Chunked(ref mut state) => match *state {
            Chunked::Size => {
                let line = match take_line(buf) {
                    Some(line) => line,
                    None => return Ok(false),
                };
                let size = std::str::from_utf8(&line)
                    .ok()
                    .and_then(|s| s.split(';').next())
                    .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
                    .ok_or_else(|| invalid_data("invalid chunk size line"))?;
                *state = if size == 0 {
                    Chunked::Trailer
                } else {
                    Chunked::Data(size)
                };
                Ok(true)
            }
            Chunked::Data(ref mut remaining) => {
                if buf.is_empty() {
                    return Ok(false);
                }
                let n = (*remaining).min(buf.len() as u64) as usize;
                *remaining -= n as u64;
                if *remaining == 0 {
                    *state = Chunked::DataEnd;
                }
                emit(
                    events,
                    ChannelEvent::BodyPart {
                        chunk: buf.split_to(n).freeze(),
                        last: false,
                    },
                )?;
                Ok(true)
            }
            Chunked::DataEnd => {
                if buf.len() < 2 {
                    return Ok(false);
                }
                if &buf[..2] != b"\r\n" {
                    return Err(invalid_data("invalid chunk end"));
                }
                buf.advance(2);
                *state = Chunked::Size;
                Ok(true)
            }
            Chunked::Trailer => {
                let line = match take_line(buf) {
                    Some(line) => line,
                    None => return Ok(false),
                };
                if line.is_empty() {
                    emit(
                        events,
                        ChannelEvent::BodyPart {
                            chunk: Bytes::new(),
                            last: true,
                        },
                    )?;
                    *reading = Reading::Head;
                }
                Ok(true)
            }
        },
        Reading::Eof => {
            if buf.is_empty() {
                return Ok(false);
            }
            let chunk = buf.split().freeze();
            emit(events, ChannelEvent::BodyPart { chunk, last: false })?;
            Ok(true)
        }
    }
}

fn take_line(buf: &mut BytesMut) -> Option<Bytes> {
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = buf.split_to(end).freeze();
    buf.advance(2);
    Some(line)
}

fn emit(events: &EventSender, event: ChannelEvent) -> io::Result<()> {
    // 接收端已经丢弃：连接的持有者不再关心这条连接
    events
        .send(event)
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "event receiver dropped"))
}

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
