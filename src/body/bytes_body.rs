use std::fmt;

use bytes::Bytes;

use super::{Body, BodyGenerator, BodyState, ChunkBuf};

/// 内容事先已知的请求体，可以任意次重放。
#[derive(Clone)]
pub struct ByteArrayBodyGenerator {
    bytes: Bytes,
}

impl ByteArrayBodyGenerator {
    /// 从任何可以转换为 `Bytes` 的值创建。
    pub fn new(bytes: impl Into<Bytes>) -> ByteArrayBodyGenerator {
        ByteArrayBodyGenerator {
            bytes: bytes.into(),
        }
    }

    /// 内容本身。
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl BodyGenerator for ByteArrayBodyGenerator {
    fn create_body(&self) -> crate::Result<Box<dyn Body>> {
        Ok(Box::new(ByteArrayBody {
            bytes: self.bytes.clone(),
            pos: 0,
        }))
    }
}

impl fmt::Debug for ByteArrayBodyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArrayBodyGenerator")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl From<Bytes> for ByteArrayBodyGenerator {
    fn from(bytes: Bytes) -> Self {
        ByteArrayBodyGenerator::new(bytes)
    }
}

impl From<Vec<u8>> for ByteArrayBodyGenerator {
    fn from(vec: Vec<u8>) -> Self {
        ByteArrayBodyGenerator::new(vec)
    }
}

impl From<&'static str> for ByteArrayBodyGenerator {
    fn from(s: &'static str) -> Self {
        ByteArrayBodyGenerator::new(s)
    }
}

impl From<String> for ByteArrayBodyGenerator {
    fn from(s: String) -> Self {
        ByteArrayBodyGenerator::new(s)
    }
}

struct ByteArrayBody {
    bytes: Bytes,
    pos: usize,
}

impl Body for ByteArrayBody {
    fn content_length(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn transfer_to(&mut self, target: &mut ChunkBuf) -> crate::Result<BodyState> {
        self.pos += target.put_slice(&self.bytes[self.pos..]);
        if self.pos == self.bytes.len() {
            Ok(BodyState::Stop)
        } else {
            Ok(BodyState::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(gen: &ByteArrayBodyGenerator, limit: usize) -> Vec<u8> {
        let mut body = gen.create_body().unwrap();
        let mut out = Vec::new();
        loop {
            let mut buf = ChunkBuf::with_limit(limit);
            let state = body.transfer_to(&mut buf).unwrap();
            out.extend_from_slice(&buf.split());
            if state == BodyState::Stop {
                return out;
            }
            assert_eq!(state, BodyState::Continue);
        }
    }

    #[test]
    fn tiny_buffers_reconstruct_content() {
        let content: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();
        let gen = ByteArrayBodyGenerator::new(content.clone());
        for limit in [1, 7, 64, 999, 1_000, 4_096] {
            assert_eq!(drain(&gen, limit), content, "limit {}", limit);
        }
    }

    #[test]
    fn cursors_are_independent() {
        let gen = ByteArrayBodyGenerator::from("hello");
        let mut first = gen.create_body().unwrap();
        let mut buf = ChunkBuf::with_limit(2);
        assert_eq!(first.transfer_to(&mut buf).unwrap(), BodyState::Continue);
        assert_eq!(drain(&gen, 2), b"hello");
        assert_eq!(first.content_length(), Some(5));
    }

    #[test]
    fn empty_body_stops_immediately() {
        let gen = ByteArrayBodyGenerator::new(Bytes::new());
        let mut body = gen.create_body().unwrap();
        let mut buf = ChunkBuf::with_limit(8);
        assert_eq!(body.transfer_to(&mut buf).unwrap(), BodyState::Stop);
        assert!(buf.is_empty());
    }
}
