//! 拉取式请求体
//!
//! 请求体不是一次性交给引擎的字节串，而是一个 [`BodyGenerator`]：
//! 每次需要（首次发送、重定向、认证质询、重试）都通过
//! [`BodyGenerator::create_body`] 创建一个新的 [`Body`] 游标，由写出循环
//! 反复调用 [`Body::transfer_to`] 拉取数据。
//!
//! `transfer_to` 的返回值 [`BodyState`] 决定写出循环的下一步：
//!
//! - `Continue`：写出已拉到的数据，马上再拉；
//! - `Suspend`：暂时没有数据，等待 [`Body::poll_resume`] 唤醒，
//!   期间不占用 I/O 任务；
//! - `Stop`：内容结束（本次可能仍写入了最后一段数据）。
//!
//! 本模块提供两种实现：
//!
//! - [`ByteArrayBodyGenerator`]：内容事先已知，可重放；
//! - [`FeedableBodyGenerator`]：请求开始后由调用方陆续 [`feed`] 分片，不可重放。
//!
//! [`feed`]: FeedableBodyGenerator::feed

use std::fmt;
use std::task::{Context, Poll};

pub use bytes::Bytes;
use bytes::BytesMut;

pub use self::bytes_body::ByteArrayBodyGenerator;
pub use self::feedable::{FeedableBodyGenerator, FeedListener};

mod bytes_body;
mod feedable;

/// 一次 `transfer_to` 之后 body 的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyState {
    /// 可能还有更多数据，应立刻再次拉取。
    Continue,
    /// 当前没有可用数据，等到 [`Body::poll_resume`] 就绪再拉取。
    Suspend,
    /// 内容已经结束。
    Stop,
}

/// 一个有状态的请求体游标。
pub trait Body: Send {
    /// 已知的内容长度；`None` 表示长度未知，需要以 chunked 编码写出。
    fn content_length(&self) -> Option<u64>;

    /// 把尽可能多的数据写入 `target`（不超过其剩余容量）。
    fn transfer_to(&mut self, target: &mut ChunkBuf) -> crate::Result<BodyState>;

    /// 在 `transfer_to` 返回 `Suspend` 之后，等待新数据到达。
    ///
    /// 默认实现立即就绪。
    fn poll_resume(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let _ = cx;
        Poll::Ready(())
    }
}

/// 请求体生成器。
///
/// 同一个生成器两次调用 `create_body` 必须得到两个互相独立的游标，
/// 它们共享的是内容本身，而不是读取位置。
pub trait BodyGenerator: Send + Sync {
    /// 创建一个新的 body 游标。
    fn create_body(&self) -> crate::Result<Box<dyn Body>>;

    /// 一个已经开始发送的 body 能否为重试重新创建。
    fn is_replayable(&self) -> bool {
        true
    }
}

/// `transfer_to` 的目标缓冲区，容量有上限。
pub struct ChunkBuf {
    buf: BytesMut,
    limit: usize,
}

impl ChunkBuf {
    /// 创建一个最多容纳 `limit` 字节的缓冲区。
    pub fn with_limit(limit: usize) -> ChunkBuf {
        ChunkBuf {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    /// 还能写入的字节数。
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    /// 已写入的字节数。
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// 是否还没有写入任何数据。
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 写入 `src` 中能放下的前缀，返回实际写入的字节数。
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.buf.extend_from_slice(&src[..n]);
        n
    }

    /// 取走已写入的数据，缓冲区恢复为空。
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl fmt::Debug for ChunkBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuf")
            .field("len", &self.buf.len())
            .field("limit", &self.limit)
            .finish()
    }
}
