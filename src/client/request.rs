//! 不可变的请求描述
//!
//! [`Request`] 一经提交就不再修改。重定向、认证重放都会派生出新的
//! `Request`，原请求保持不变，这样同一个 [`RequestFuture`](super::RequestFuture)
//! 可以同时记住"最初的目标"和"当前正在发送的请求"。

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use super::proxy::ProxyServer;
use super::realm::Realm;
use crate::body::{BodyGenerator, ByteArrayBodyGenerator};
use crate::error::Parse;

/// 一个 `name=value` cookie。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
}

impl Cookie {
    /// 新建 cookie。
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Cookie {
        Cookie {
            name: name.into(),
            value: value.into(),
        }
    }

    /// 名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 值。
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 从 `Set-Cookie` 头部值中取出 `name=value` 部分，忽略属性。
    pub(crate) fn parse_set_cookie(value: &HeaderValue) -> Option<Cookie> {
        let s = value.to_str().ok()?;
        let pair = s.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Cookie::new(name, value.trim().trim_matches('"')))
    }
}

/// 一个待发送的 HTTP 请求。
#[derive(Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    form_params: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Option<Arc<dyn BodyGenerator>>,
    proxy: Option<ProxyServer>,
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    virtual_host: Option<String>,
    realm: Option<Realm>,
    follow_redirect: Option<bool>,
    local_address: Option<IpAddr>,
}

impl Request {
    /// 以给定方法与 URI 开始构建。
    pub fn builder<T>(method: Method, uri: T) -> RequestBuilder
    where
        T: TryInto<Uri>,
    {
        RequestBuilder {
            inner: uri
                .try_into()
                .map_err(|_| crate::Error::from(Parse::Uri))
                .map(|uri| Request::new(method, uri)),
        }
    }

    /// `GET uri`
    pub fn get<T: TryInto<Uri>>(uri: T) -> RequestBuilder {
        Request::builder(Method::GET, uri)
    }

    /// `POST uri`
    pub fn post<T: TryInto<Uri>>(uri: T) -> RequestBuilder {
        Request::builder(Method::POST, uri)
    }

    fn new(method: Method, uri: Uri) -> Request {
        Request {
            method,
            uri,
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            form_params: Vec::new(),
            cookies: Vec::new(),
            body: None,
            proxy: None,
            request_timeout: None,
            read_timeout: None,
            virtual_host: None,
            realm: None,
            follow_redirect: None,
            local_address: None,
        }
    }

    /// 以本请求为模板构建一个新请求。
    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder {
            inner: Ok(self.clone()),
        }
    }

    /// 请求方法。
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// 请求 URI（不含额外的查询参数）。
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// 请求头。
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 追加到 URI 上的查询参数。
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// 以 `application/x-www-form-urlencoded` 发送的表单参数。
    pub fn form_params(&self) -> &[(String, String)] {
        &self.form_params
    }

    /// cookies。
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// 请求级代理覆盖。
    pub fn proxy(&self) -> Option<&ProxyServer> {
        self.proxy.as_ref()
    }

    /// 请求级总超时覆盖。
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// 请求级空闲超时覆盖。
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// 虚拟主机，覆盖 `Host` 头部。
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    /// 认证凭据。
    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    /// 请求级是否跟随重定向的覆盖。
    pub fn follow_redirect(&self) -> Option<bool> {
        self.follow_redirect
    }

    /// 绑定的本地地址。
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    /// 是否携带 body（显式 body 或表单参数）。
    pub fn has_body(&self) -> bool {
        self.body.is_some() || !self.form_params.is_empty()
    }

    /// 一个已经开始发送的 body 能否重新创建。
    pub fn is_replayable(&self) -> bool {
        self.body.as_ref().map_or(true, |body| body.is_replayable())
    }

    /// 要发送的 body：显式 body 优先，其次是编码后的表单参数。
    pub(crate) fn body_generator(&self) -> Option<Arc<dyn BodyGenerator>> {
        if let Some(ref body) = self.body {
            return Some(body.clone());
        }
        if self.form_params.is_empty() {
            return None;
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form_params.iter())
            .finish();
        Some(Arc::new(ByteArrayBodyGenerator::new(encoded)))
    }

    /// 把查询参数合并进 URI 后的完整 URI。
    pub(crate) fn full_uri(&self) -> crate::Result<Uri> {
        if self.query_params.is_empty() {
            return Ok(self.uri.clone());
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(self.query_params.iter());
        let extra = serializer.finish();

        let path = self.uri.path();
        let pq = match self.uri.query() {
            Some(q) if !q.is_empty() => format!("{}?{}&{}", path, q, extra),
            _ => format!("{}?{}", path, extra),
        };
        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(pq.parse().map_err(Parse::from)?);
        Ok(Uri::from_parts(parts).map_err(Parse::from)?)
    }

    pub(crate) fn body(&self) -> Option<&Arc<dyn BodyGenerator>> {
        self.body.as_ref()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("has_body", &self.has_body())
            .field("proxy", &self.proxy)
            .field("virtual_host", &self.virtual_host)
            .finish()
    }
}

/// [`Request`] 的构建器。
///
/// 与 `http::request::Builder` 一样，构建过程中的第一个错误会被保留，
/// 在 [`build`](Self::build) 时返回。
pub struct RequestBuilder {
    inner: crate::Result<Request>,
}

impl RequestBuilder {
    fn and_then<F>(self, func: F) -> Self
    where
        F: FnOnce(Request) -> crate::Result<Request>,
    {
        RequestBuilder {
            inner: self.inner.and_then(func),
        }
    }

    /// 更换请求方法。
    pub fn method(self, method: Method) -> Self {
        self.and_then(|mut req| {
            req.method = method;
            Ok(req)
        })
    }

    /// 更换 URI。
    pub fn uri<T: TryInto<Uri>>(self, uri: T) -> Self {
        let uri = uri.try_into().map_err(|_| crate::Error::from(Parse::Uri));
        self.and_then(move |mut req| {
            req.uri = uri?;
            Ok(req)
        })
    }

    /// 追加一个请求头。
    pub fn header<K, V>(self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().map_err(|_| crate::Error::from(Parse::Header));
        let value = value.try_into().map_err(|_| crate::Error::from(Parse::Header));
        self.and_then(move |mut req| {
            req.headers.append(name?, value?);
            Ok(req)
        })
    }

    /// 整体替换请求头。
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.and_then(move |mut req| {
            req.headers = headers;
            Ok(req)
        })
    }

    /// 追加一个查询参数。
    pub fn query_param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (name.into(), value.into());
        self.and_then(move |mut req| {
            req.query_params.push(pair);
            Ok(req)
        })
    }

    /// 追加一个表单参数。
    pub fn form_param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (name.into(), value.into());
        self.and_then(move |mut req| {
            req.form_params.push(pair);
            Ok(req)
        })
    }

    /// 添加 cookie；同名 cookie 会被替换。
    pub fn cookie(self, cookie: Cookie) -> Self {
        self.and_then(move |mut req| {
            req.cookies.retain(|c| c.name != cookie.name);
            req.cookies.push(cookie);
            Ok(req)
        })
    }

    /// 使用一个 body 生成器。
    pub fn body<G>(self, body: G) -> Self
    where
        G: BodyGenerator + 'static,
    {
        self.body_generator(Arc::new(body))
    }

    /// 使用一段固定内容作为 body。
    pub fn body_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(ByteArrayBodyGenerator::new(bytes))
    }

    /// 使用一个共享的 body 生成器。
    pub fn body_generator(self, body: Arc<dyn BodyGenerator>) -> Self {
        self.and_then(move |mut req| {
            req.body = Some(body);
            Ok(req)
        })
    }

    pub(crate) fn clear_body(self) -> Self {
        self.and_then(|mut req| {
            req.body = None;
            req.form_params.clear();
            Ok(req)
        })
    }

    pub(crate) fn clear_query_params(self) -> Self {
        self.and_then(|mut req| {
            req.query_params.clear();
            Ok(req)
        })
    }

    /// 请求级代理。
    pub fn proxy(self, proxy: ProxyServer) -> Self {
        self.and_then(move |mut req| {
            req.proxy = Some(proxy);
            Ok(req)
        })
    }

    /// 请求级总超时。
    pub fn request_timeout(self, timeout: Duration) -> Self {
        self.and_then(move |mut req| {
            req.request_timeout = Some(timeout);
            Ok(req)
        })
    }

    /// 请求级空闲超时。
    pub fn read_timeout(self, timeout: Duration) -> Self {
        self.and_then(move |mut req| {
            req.read_timeout = Some(timeout);
            Ok(req)
        })
    }

    /// 虚拟主机。
    pub fn virtual_host(self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.and_then(move |mut req| {
            req.virtual_host = Some(host);
            Ok(req)
        })
    }

    pub(crate) fn set_virtual_host(self, host: Option<String>) -> Self {
        self.and_then(move |mut req| {
            req.virtual_host = host;
            Ok(req)
        })
    }

    /// 认证凭据。
    pub fn realm(self, realm: Realm) -> Self {
        self.and_then(move |mut req| {
            req.realm = Some(realm);
            Ok(req)
        })
    }

    /// 覆盖客户端的重定向设置。
    pub fn follow_redirect(self, follow: bool) -> Self {
        self.and_then(move |mut req| {
            req.follow_redirect = Some(follow);
            Ok(req)
        })
    }

    /// 绑定本地地址。
    pub fn local_address(self, addr: IpAddr) -> Self {
        self.and_then(move |mut req| {
            req.local_address = Some(addr);
            Ok(req)
        })
    }

    /// 完成构建。URI 必须是带主机的 `http` / `https` 绝对 URI。
    pub fn build(self) -> crate::Result<Request> {
        let req = self.inner?;
        match req.uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(crate::Error::new_user_invalid_request(format!(
                    "unsupported scheme in {}",
                    req.uri
                )))
            }
        }
        if req.uri.host().map_or(true, str::is_empty) {
            return Err(crate::Error::new_user_invalid_request(format!(
                "missing host in {}",
                req.uri
            )));
        }
        Ok(req)
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("inner", &self.inner)
            .finish()
    }
}
