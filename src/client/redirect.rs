//! 跟随重定向
//!
//! 根据 3xx 响应派生出下一个请求：
//!
//! - 303，以及 301 / 302（未开启 `strict_302_handling` 时）改为 `GET` 并丢弃 body，
//!   `HEAD` 与 `OPTIONS` 保持原方法；
//! - 307 / 308（以及严格模式下的 302）保留方法与 body；
//! - 响应设置的 cookie 带到新请求上；
//! - 虚拟主机只在同源（scheme、主机、端口相同）重定向时保留；
//! - `Host` 与 `Content-Length` 不传播，丢弃 body 时 `Content-Type` 也不传播。

use http::header::{self, HeaderMap};
use http::uri::{Parts, PathAndQuery};
use http::{Method, StatusCode, Uri};

use super::pool::default_port;
use super::request::{Cookie, Request};
use super::wire;
use crate::error::Parse;

/// 状态码是否为会被跟随的重定向。
pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 以 `base` 为基准解析 `Location`。
pub(crate) fn resolve_location(base: &Uri, location: &str) -> crate::Result<Uri> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Parse::location().into());
    }

    if location.contains("://") {
        return location.parse().map_err(|_| Parse::location().into());
    }

    let scheme = base.scheme_str().unwrap_or("http");
    if let Some(rest) = location.strip_prefix("//") {
        return format!("{}://{}", scheme, rest)
            .parse()
            .map_err(|_| Parse::location().into());
    }

    let path = if location.starts_with('/') {
        location.to_owned()
    } else if location.starts_with('?') {
        format!("{}{}", base.path(), location)
    } else {
        let dir = match base.path().rfind('/') {
            Some(i) => &base.path()[..=i],
            None => "/",
        };
        format!("{}{}", dir, location)
    };

    let mut parts = Parts::default();
    parts.scheme = base.scheme().cloned();
    parts.authority = base.authority().cloned();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path.as_str()).map_err(|_| Parse::location())?,
    );
    Ok(Uri::from_parts(parts).map_err(|_| Parse::location())?)
}

/// 两个 URI 是否同源。
pub(crate) fn is_same_base(a: &Uri, b: &Uri) -> bool {
    a.scheme_str() == b.scheme_str()
        && a.host().map(str::to_ascii_lowercase) == b.host().map(str::to_ascii_lowercase)
        && default_port(a) == default_port(b)
}

/// 派生重定向后的请求。响应不是可跟随的重定向（或缺少 `Location`）时返回 `None`。
pub(crate) fn next_request(
    current: &Request,
    current_uri: &Uri,
    status: StatusCode,
    headers: &HeaderMap,
    strict_302_handling: bool,
) -> crate::Result<Option<Request>> {
    if !is_redirect(status) {
        return Ok(None);
    }
    let location = match headers.get(header::LOCATION) {
        Some(value) => value.to_str().map_err(|_| Parse::location())?,
        None => return Ok(None),
    };
    let uri = resolve_location(current_uri, location)?;

    let code = status.as_u16();
    let keeps_method = matches!(*current.method(), Method::GET | Method::HEAD | Method::OPTIONS);
    let switch_to_get = !keeps_method
        && (code == 301 || code == 303 || (code == 302 && !strict_302_handling));
    let keep_body = code == 307 || code == 308 || (code == 302 && strict_302_handling);

    let mut propagated = HeaderMap::new();
    for (name, value) in current.headers() {
        if *name == header::HOST || *name == header::CONTENT_LENGTH {
            continue;
        }
        if !keep_body && *name == header::CONTENT_TYPE {
            continue;
        }
        propagated.append(name.clone(), value.clone());
    }

    let same_base = is_same_base(current_uri, &uri);
    let mut builder = current
        .to_builder()
        .uri(uri)
        .headers(propagated)
        .clear_query_params()
        .set_virtual_host(if same_base {
            current.virtual_host().map(str::to_owned)
        } else {
            None
        });
    if switch_to_get {
        builder = builder.method(Method::GET);
    }
    if !keep_body {
        builder = builder.clear_body();
    }
    for cookie in wire::set_cookies(headers).filter_map(Cookie::parse_set_cookie) {
        builder = builder.cookie(cookie);
    }
    builder.build().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn location(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn resolves_relative_locations() {
        let base = Uri::from_static("http://example.com:8080/a/b?x=1");
        assert_eq!(
            resolve_location(&base, "https://other.org/z").unwrap(),
            "https://other.org/z"
        );
        assert_eq!(
            resolve_location(&base, "//cdn.example.com/c").unwrap(),
            "http://cdn.example.com/c"
        );
        assert_eq!(
            resolve_location(&base, "/root").unwrap(),
            "http://example.com:8080/root"
        );
        assert_eq!(
            resolve_location(&base, "c?d=2").unwrap(),
            "http://example.com:8080/a/c?d=2"
        );
        assert!(resolve_location(&base, "").unwrap_err().is_parse());
    }

    #[test]
    fn see_other_switches_to_get() {
        let req = Request::post("http://example.com/form")
            .header(header::CONTENT_TYPE, "text/plain")
            .header("x-keep", "1")
            .body_bytes("payload")
            .build()
            .unwrap();
        let next = next_request(
            &req,
            req.uri(),
            StatusCode::SEE_OTHER,
            &location("/done"),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(next.method(), &Method::GET);
        assert!(!next.has_body());
        assert!(next.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(next.headers()["x-keep"], "1");
        assert_eq!(next.uri(), "http://example.com/done");
    }

    #[test]
    fn temporary_redirect_keeps_method_and_body() {
        let req = Request::post("http://example.com/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body_bytes("payload")
            .build()
            .unwrap();
        let next = next_request(
            &req,
            req.uri(),
            StatusCode::TEMPORARY_REDIRECT,
            &location("http://example.com/v2/upload"),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(next.method(), &Method::POST);
        assert!(next.has_body());
        assert_eq!(next.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn strict_302_keeps_method() {
        let req = Request::post("http://example.com/a").build().unwrap();
        let lax = next_request(&req, req.uri(), StatusCode::FOUND, &location("/b"), false)
            .unwrap()
            .unwrap();
        assert_eq!(lax.method(), &Method::GET);
        let strict = next_request(&req, req.uri(), StatusCode::FOUND, &location("/b"), true)
            .unwrap()
            .unwrap();
        assert_eq!(strict.method(), &Method::POST);
    }

    #[test]
    fn head_survives_redirect() {
        let req = Request::builder(Method::HEAD, "http://example.com/a").build().unwrap();
        for status in [StatusCode::MOVED_PERMANENTLY, StatusCode::FOUND, StatusCode::SEE_OTHER] {
            let next = next_request(&req, req.uri(), status, &location("/b"), false)
                .unwrap()
                .unwrap();
            assert_eq!(next.method(), &Method::HEAD, "{}", status);
        }
    }

    #[test]
    fn cookies_and_virtual_host() {
        let req = Request::get("http://example.com/")
            .virtual_host("vhost")
            .build()
            .unwrap();
        let mut headers = location("/same");
        headers.append(header::SET_COOKIE, HeaderValue::from_static("sid=1; Path=/"));

        let next = next_request(&req, req.uri(), StatusCode::FOUND, &headers, false)
            .unwrap()
            .unwrap();
        assert_eq!(next.virtual_host(), Some("vhost"));
        assert_eq!(next.cookies(), &[Cookie::new("sid", "1")]);

        let cross = next_request(
            &req,
            req.uri(),
            StatusCode::FOUND,
            &location("http://elsewhere.com/"),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(cross.virtual_host(), None);
    }

    #[test]
    fn not_a_redirect() {
        let req = Request::get("http://example.com/").build().unwrap();
        assert!(next_request(&req, req.uri(), StatusCode::OK, &location("/x"), false)
            .unwrap()
            .is_none());
        assert!(next_request(&req, req.uri(), StatusCode::FOUND, &HeaderMap::new(), false)
            .unwrap()
            .is_none());
    }
}
