//! 传输层抽象
//!
//! 引擎本身不做网络 I/O，也不解析响应字节。它通过一个很窄的接口与
//! 传输层协作：
//!
//! - [`Transport::connect`] 建立到目标的连接，得到一个 [`Channel`]
//!   以及一个事件接收端；
//! - [`Channel::write`] 写出字节，返回的 future 在写入完成（或失败）时就绪；
//! - [`Channel::close`] 关闭连接；
//! - 传输层把解析出的响应以 [`ChannelEvent`] 推入事件通道：一个状态行、
//!   一组头部、若干 body 分片（最后一个分片 `last = true`，可能为空），
//!   以及连接关闭或出错事件。
//!
//! 每个响应都必须以一个 `last = true` 的 `BodyPart` 结束，即使响应
//! 没有 body（例如 HEAD、204、304），这是引擎判断"响应已完整"的唯一依据。

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use tokio::sync::mpsc;

cfg_tcp! {
    pub mod tcp;
}

/// 装箱的 `Send` future。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 事件发送端，由传输层持有。
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// 事件接收端，由持有连接的一方消费。
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// 创建一对事件通道。
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// 连接的进程内唯一标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配下一个标识。
    pub fn next() -> ChannelId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 数值形式。
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 一条已建立的连接。
pub trait Channel: Send + Sync + 'static {
    /// 连接标识。
    fn id(&self) -> ChannelId;

    /// 写出一段字节。返回的 future 在写入完成时就绪。
    ///
    /// 实现者必须保证多次调用按调用顺序写出。
    fn write(&self, buf: Bytes) -> BoxFuture<'static, io::Result<()>>;

    /// 关闭连接。重复调用无副作用。
    fn close(&self);

    /// 连接是否仍然可用。
    fn is_open(&self) -> bool;

    /// 对端地址（用于日志与超时错误信息）。
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// 经由 HTTP 代理的 CONNECT 隧道建立后，在原连接上发起 TLS 握手。
    ///
    /// 默认实现什么也不做。
    fn start_tls(&self, host: &str) -> BoxFuture<'static, io::Result<()>> {
        let _ = host;
        Box::pin(async { Ok(()) })
    }
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("open", &self.is_open())
            .finish()
    }
}

/// 建立连接所需的信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    /// 要连接的主机（使用代理时为代理主机）。
    pub host: String,
    /// 端口。
    pub port: u16,
    /// 是否需要在连接建立后立刻进行 TLS 握手。
    pub secure: bool,
    /// 绑定的本地地址。
    pub local_addr: Option<IpAddr>,
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 一次成功的连接。
pub struct Connected {
    /// 连接本身。
    pub channel: Arc<dyn Channel>,
    /// 该连接上的响应事件。
    pub events: EventReceiver,
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("channel", &self.channel)
            .finish()
    }
}

/// 建立连接的能力。
pub trait Transport: Send + Sync + 'static {
    /// 连接到 `target`。
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, io::Result<Connected>>;
}

/// 响应状态行。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusLine {
    /// 协议版本。
    pub version: Version,
    /// 状态码。
    pub status: StatusCode,
    /// 原因短语。
    pub reason: Option<String>,
}

impl StatusLine {
    /// `HTTP/1.1 <status>`，没有原因短语。
    pub fn new(status: StatusCode) -> StatusLine {
        StatusLine {
            version: Version::HTTP_11,
            status,
            reason: None,
        }
    }
}

/// 传输层推送给引擎的事件。
#[derive(Debug)]
pub enum ChannelEvent {
    /// 收到状态行。
    Status(StatusLine),
    /// 收到完整的头部。
    Headers(HeaderMap),
    /// 收到一段 body。
    BodyPart {
        /// 内容，可能为空。
        chunk: Bytes,
        /// 是否为最后一段。
        last: bool,
    },
    /// 对端关闭了连接。
    Closed,
    /// 读写出错，连接不可再用。
    Error(io::Error),
}
