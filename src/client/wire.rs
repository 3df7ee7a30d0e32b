//! HTTP/1.1 请求头编码

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{HeaderMap, Method, Uri};

use super::pool::default_port;
use super::request::Request;

/// 请求 body 在线路上的形式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Framing {
    /// 没有 body。
    Empty,
    /// 已知长度。
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// 编码一个请求所需的全部信息。
pub(crate) struct Head<'a> {
    pub(crate) request: &'a Request,
    pub(crate) uri: &'a Uri,
    /// 经由明文代理时请求行使用 absolute-form。
    pub(crate) absolute_form: bool,
    pub(crate) framing: Framing,
    pub(crate) keep_alive: bool,
    pub(crate) user_agent: Option<&'a str>,
    pub(crate) authorization: Option<HeaderValue>,
    pub(crate) proxy_authorization: Option<HeaderValue>,
}

impl Head<'_> {
    pub(crate) fn encode(&self) -> Bytes {
        let mut dst = Vec::with_capacity(256);
        let method = self.request.method();
        let headers = self.request.headers();

        extend(&mut dst, method.as_str().as_bytes());
        extend(&mut dst, b" ");
        if self.absolute_form {
            extend(&mut dst, self.uri.to_string().as_bytes());
        } else {
            let pq = self.uri.path_and_query().map_or("/", |pq| pq.as_str());
            extend(&mut dst, if pq.is_empty() { "/" } else { pq }.as_bytes());
        }
        extend(&mut dst, b" HTTP/1.1\r\n");

        if !headers.contains_key(header::HOST) {
            extend(&mut dst, b"host: ");
            match self.request.virtual_host() {
                Some(vh) => extend(&mut dst, vh.as_bytes()),
                None => write_host(&mut dst, self.uri),
            }
            extend(&mut dst, b"\r\n");
        }

        for (name, value) in headers {
            if *name == header::CONTENT_LENGTH || *name == header::TRANSFER_ENCODING {
                continue;
            }
            write_header(&mut dst, name.as_str(), value);
        }

        match self.framing {
            Framing::Length(len) => write_content_length(&mut dst, len),
            Framing::Chunked => extend(&mut dst, b"transfer-encoding: chunked\r\n"),
            Framing::Empty => {
                if crate::headers::method_has_defined_payload_semantics(method) {
                    write_content_length(&mut dst, 0);
                }
            }
        }

        if !headers.contains_key(header::CONNECTION) {
            if self.keep_alive {
                extend(&mut dst, b"connection: keep-alive\r\n");
            } else {
                extend(&mut dst, b"connection: close\r\n");
            }
        }
        if !headers.contains_key(header::ACCEPT) {
            extend(&mut dst, b"accept: */*\r\n");
        }
        if !headers.contains_key(header::USER_AGENT) {
            if let Some(agent) = self.user_agent {
                extend(&mut dst, b"user-agent: ");
                extend(&mut dst, agent.as_bytes());
                extend(&mut dst, b"\r\n");
            }
        }
        if !self.request.form_params().is_empty()
            && self.request.body().is_none()
            && !headers.contains_key(header::CONTENT_TYPE)
        {
            extend(
                &mut dst,
                b"content-type: application/x-www-form-urlencoded\r\n",
            );
        }
        write_cookies(&mut dst, self.request);
        if let Some(ref value) = self.authorization {
            write_header(&mut dst, header::AUTHORIZATION.as_str(), value);
        }
        if let Some(ref value) = self.proxy_authorization {
            write_header(&mut dst, header::PROXY_AUTHORIZATION.as_str(), value);
        }

        extend(&mut dst, b"\r\n");
        Bytes::from(dst)
    }
}

/// 经由代理建立隧道的 `CONNECT` 请求。
pub(crate) fn encode_connect(
    host: &str,
    port: u16,
    user_agent: Option<&str>,
    proxy_authorization: Option<&HeaderValue>,
) -> Bytes {
    let mut dst = Vec::with_capacity(128);
    let mut buf = itoa::Buffer::new();
    let port = buf.format(port);
    extend(&mut dst, Method::CONNECT.as_str().as_bytes());
    extend(&mut dst, b" ");
    extend(&mut dst, host.as_bytes());
    extend(&mut dst, b":");
    extend(&mut dst, port.as_bytes());
    extend(&mut dst, b" HTTP/1.1\r\nhost: ");
    extend(&mut dst, host.as_bytes());
    extend(&mut dst, b":");
    extend(&mut dst, port.as_bytes());
    extend(&mut dst, b"\r\nproxy-connection: keep-alive\r\n");
    if let Some(agent) = user_agent {
        extend(&mut dst, b"user-agent: ");
        extend(&mut dst, agent.as_bytes());
        extend(&mut dst, b"\r\n");
    }
    if let Some(value) = proxy_authorization {
        write_header(&mut dst, header::PROXY_AUTHORIZATION.as_str(), value);
    }
    extend(&mut dst, b"\r\n");
    Bytes::from(dst)
}

/// 一个 chunked 分片：`<hex len>\r\n<data>\r\n`。空数据不应编码（会被当作结束）。
pub(crate) fn encode_chunk(chunk: &[u8]) -> Bytes {
    let size = format!("{:X}\r\n", chunk.len());
    let mut dst = Vec::with_capacity(size.len() + chunk.len() + 2);
    extend(&mut dst, size.as_bytes());
    extend(&mut dst, chunk);
    extend(&mut dst, b"\r\n");
    Bytes::from(dst)
}

/// chunked 编码的结束标记。
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

fn write_host(dst: &mut Vec<u8>, uri: &Uri) {
    if let Some(host) = uri.host() {
        extend(dst, host.as_bytes());
    }
    let port = default_port(uri);
    let default = if uri.scheme_str() == Some("https") { 443 } else { 80 };
    if port != default {
        let mut buf = itoa::Buffer::new();
        extend(dst, b":");
        extend(dst, buf.format(port).as_bytes());
    }
}

fn write_content_length(dst: &mut Vec<u8>, len: u64) {
    let mut buf = itoa::Buffer::new();
    extend(dst, b"content-length: ");
    extend(dst, buf.format(len).as_bytes());
    extend(dst, b"\r\n");
}

fn write_cookies(dst: &mut Vec<u8>, request: &Request) {
    let cookies = request.cookies();
    if cookies.is_empty() {
        return;
    }
    extend(dst, b"cookie: ");
    for (i, cookie) in cookies.iter().enumerate() {
        if i > 0 {
            extend(dst, b"; ");
        }
        extend(dst, cookie.name().as_bytes());
        extend(dst, b"=");
        extend(dst, cookie.value().as_bytes());
    }
    extend(dst, b"\r\n");
}

fn write_header(dst: &mut Vec<u8>, name: &str, value: &HeaderValue) {
    extend(dst, name.as_bytes());
    extend(dst, b": ");
    extend(dst, value.as_bytes());
    extend(dst, b"\r\n");
}

#[inline]
fn extend(dst: &mut Vec<u8>, data: &[u8]) {
    dst.extend_from_slice(data);
}

/// 响应头中的全部 `Set-Cookie`。
pub(crate) fn set_cookies(headers: &HeaderMap) -> impl Iterator<Item = &HeaderValue> {
    headers.get_all(header::SET_COOKIE).iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::request::Cookie;

    fn head<'a>(request: &'a Request, uri: &'a Uri, framing: Framing) -> Head<'a> {
        Head {
            request,
            uri,
            absolute_form: false,
            framing,
            keep_alive: true,
            user_agent: Some("courier/test"),
            authorization: None,
            proxy_authorization: None,
        }
    }

    #[test]
    fn get_head() {
        let req = Request::get("http://example.com:8080/a?b=c")
            .header("x-trace", "1")
            .cookie(Cookie::new("sid", "42"))
            .cookie(Cookie::new("lang", "en"))
            .build()
            .unwrap();
        let uri = req.full_uri().unwrap();
        let bytes = head(&req, &uri, Framing::Empty).encode();
        assert_eq!(
            &bytes[..],
            &b"GET /a?b=c HTTP/1.1\r\n\
               host: example.com:8080\r\n\
               x-trace: 1\r\n\
               connection: keep-alive\r\n\
               accept: */*\r\n\
               user-agent: courier/test\r\n\
               cookie: sid=42; lang=en\r\n\
               \r\n"[..]
        );
    }

    #[test]
    fn post_head_framing() {
        let req = Request::post("https://example.com/")
            .virtual_host("api.internal")
            .build()
            .unwrap();
        let uri = req.full_uri().unwrap();

        let bytes = head(&req, &uri, Framing::Empty).encode();
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.starts_with("POST / HTTP/1.1\r\nhost: api.internal\r\n"));
        assert!(s.contains("content-length: 0\r\n"));

        let bytes = head(&req, &uri, Framing::Chunked).encode();
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.contains("transfer-encoding: chunked\r\n"));
        assert!(!s.contains("content-length"));
    }

    #[test]
    fn proxy_absolute_form_and_credentials() {
        let req = Request::get("http://example.com/x").build().unwrap();
        let uri = req.full_uri().unwrap();
        let mut h = head(&req, &uri, Framing::Empty);
        h.absolute_form = true;
        h.keep_alive = false;
        h.proxy_authorization = Some(HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        let bytes = h.encode();
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.starts_with("GET http://example.com/x HTTP/1.1\r\n"));
        assert!(s.contains("connection: close\r\n"));
        assert!(s.contains("proxy-authorization: Basic Zm9vOmJhcg==\r\n"));
    }

    #[test]
    fn chunks() {
        assert_eq!(&encode_chunk(b"hello world!!!!!")[..], b"10\r\nhello world!!!!!\r\n");
        let connect = encode_connect("example.com", 443, None, None);
        assert!(connect.starts_with(b"CONNECT example.com:443 HTTP/1.1\r\n"));
    }
}
