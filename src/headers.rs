//! HTTP 头部辅助函数
//!
//! 写出请求头（`Content-Length`、`Connection`）、判断响应是否允许保持连接，
//! 以及 TCP 传输解析响应 body 长度时共用的小工具。

use http::header::{HeaderValue, CONNECTION};
#[cfg(feature = "tcp")]
use http::header::{ValueIter, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};

pub(super) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(super) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// 响应是否允许复用连接。
///
/// HTTP/1.1 默认保持连接，除非出现 `Connection: close`；
/// HTTP/1.0 只有显式带 `Connection: keep-alive` 才保持。
pub(super) fn response_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let mut values = headers.get_all(CONNECTION).iter();
    match version {
        Version::HTTP_10 | Version::HTTP_09 => values.any(connection_keep_alive),
        _ => !values.any(connection_close),
    }
}

#[cfg(feature = "tcp")]
pub(super) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    let mut content_length: Option<u64> = None;
    for h in headers.get_all(CONTENT_LENGTH) {
        let line = h.to_str().ok()?;
        for v in line.split(',') {
            let n = from_digits(v.trim().as_bytes())?;
            if content_length.is_none() {
                content_length = Some(n)
            } else if content_length != Some(n) {
                // 多个不一致的值
                return None;
            }
        }
    }

    content_length
}

#[cfg(feature = "tcp")]
fn from_digits(bytes: &[u8]) -> Option<u64> {
    // cannot use FromStr for u64, since it allows a signed prefix
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                // not a DIGIT, get outta here!
                return None;
            }
        }
    }

    Some(result)
}

/// 请求方法是否为 body 定义了语义。没有 body 的 POST / PUT 仍需写出
/// `Content-Length: 0`，而 GET / HEAD 等则不写。
pub(super) fn method_has_defined_payload_semantics(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::CONNECT | Method::OPTIONS | Method::TRACE
    )
}

#[cfg(feature = "tcp")]
pub(super) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    is_chunked(headers.get_all(TRANSFER_ENCODING).into_iter())
}

#[cfg(feature = "tcp")]
fn is_chunked(mut encodings: ValueIter<'_, HeaderValue>) -> bool {
    // chunked 必须是最后一个编码（RFC 9112 §6.1）
    if let Some(line) = encodings.next_back() {
        if let Ok(s) = line.to_str() {
            if let Some(encoding) = s.rsplit(',').next() {
                return encoding.trim().eq_ignore_ascii_case("chunked");
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_by_version() {
        let mut headers = HeaderMap::new();
        assert!(response_keep_alive(Version::HTTP_11, &headers));
        assert!(!response_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        assert!(response_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("upgrade, close"));
        assert!(!response_keep_alive(Version::HTTP_11, &headers));
    }

    #[cfg(feature = "tcp")]
    #[test]
    fn content_length_values() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length_parse_all(&headers), None);

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("42, 42"));
        assert_eq!(content_length_parse_all(&headers), Some(42));

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("+7"));
        assert_eq!(content_length_parse_all(&headers), None);
    }
}
