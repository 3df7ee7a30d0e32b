//! 认证凭据与质询应答
//!
//! [`Realm`] 把用户名、密码和认证方案打包在一起。收到 `401` / `407` 时，
//! 引擎用服务端的 `WWW-Authenticate` / `Proxy-Authenticate` 质询更新 realm，
//! 再计算出 `Authorization` / `Proxy-Authorization` 头部值。
//!
//! 支持 Basic 与 Digest（MD5、MD5-sess，`qop=auth`）。

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::prelude::BASE64_STANDARD;
use base64::write::EncoderWriter;
use http::header::HeaderValue;
use http::{Method, Uri};

/// 认证方案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// RFC 7617
    Basic,
    /// RFC 7616（MD5）
    Digest,
}

impl AuthScheme {
    fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
        }
    }
}

/// 一组认证凭据及其协商出的参数。
#[derive(Clone)]
pub struct Realm {
    principal: String,
    password: String,
    scheme: AuthScheme,
    use_preemptive_auth: bool,
    realm_name: Option<String>,
    nonce: Option<String>,
    opaque: Option<String>,
    algorithm: Option<String>,
    qop: Option<String>,
    nc: Arc<AtomicU32>,
}

impl Realm {
    /// Basic 凭据，默认在首个请求上就主动发送（preemptive）。
    pub fn basic(principal: impl Into<String>, password: impl Into<String>) -> Realm {
        Realm::new(principal.into(), password.into(), AuthScheme::Basic, true)
    }

    /// Digest 凭据。必须先收到服务端的质询（nonce）才能应答。
    pub fn digest(principal: impl Into<String>, password: impl Into<String>) -> Realm {
        Realm::new(principal.into(), password.into(), AuthScheme::Digest, false)
    }

    fn new(principal: String, password: String, scheme: AuthScheme, preemptive: bool) -> Realm {
        Realm {
            principal,
            password,
            scheme,
            use_preemptive_auth: preemptive,
            realm_name: None,
            nonce: None,
            opaque: None,
            algorithm: None,
            qop: None,
            nc: Arc::new(AtomicU32::new(0)),
        }
    }

    /// 是否在收到质询之前就发送凭据。只对 Basic 生效。
    pub fn use_preemptive_auth(mut self, enabled: bool) -> Realm {
        self.use_preemptive_auth = enabled;
        self
    }

    /// 用户名。
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// 认证方案。
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// 是否会在质询之前主动发送凭据。
    pub fn is_preemptive(&self) -> bool {
        self.use_preemptive_auth && self.scheme == AuthScheme::Basic
    }

    /// 服务端质询中的 realm 名称。
    pub fn realm_name(&self) -> Option<&str> {
        self.realm_name.as_deref()
    }

    /// Digest 质询中的 nonce。
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// 从一组质询头部值中挑出与本方案匹配的一个，返回更新后的 realm。
    ///
    /// 没有匹配的质询（或 Digest 质询缺少 nonce）时返回 `None`。
    pub(crate) fn with_challenge<'a, I>(&self, challenges: I) -> Option<Realm>
    where
        I: IntoIterator<Item = &'a HeaderValue>,
    {
        for value in challenges {
            let value = match value.to_str() {
                Ok(v) => v.trim(),
                Err(_) => continue,
            };
            let (scheme, rest) = match value.find(' ') {
                Some(i) => (&value[..i], &value[i + 1..]),
                None => (value, ""),
            };
            if !scheme.eq_ignore_ascii_case(self.scheme.as_str()) {
                continue;
            }

            let params = parse_params(rest);
            let mut realm = self.clone();
            realm.realm_name = param(&params, "realm");
            realm.nc = Arc::new(AtomicU32::new(0));
            if self.scheme == AuthScheme::Digest {
                realm.nonce = Some(param(&params, "nonce")?);
                realm.opaque = param(&params, "opaque");
                realm.algorithm = param(&params, "algorithm");
                realm.qop = param(&params, "qop");
            }
            return Some(realm);
        }
        None
    }

    /// 为一个请求计算认证头部值。
    ///
    /// Digest 在还没有 nonce 时返回 `None`。
    pub(crate) fn authorization(&self, method: &Method, uri: &Uri) -> Option<HeaderValue> {
        match self.scheme {
            AuthScheme::Basic => Some(basic_auth(&self.principal, &self.password)),
            AuthScheme::Digest => self.digest_auth(method, uri),
        }
    }

    fn digest_auth(&self, method: &Method, uri: &Uri) -> Option<HeaderValue> {
        let nonce = self.nonce.as_deref()?;
        let realm = self.realm_name.as_deref().unwrap_or("");
        let digest_uri = if *method == Method::CONNECT {
            uri.authority().map(|a| a.as_str())
        } else {
            uri.path_and_query().map(|pq| pq.as_str())
        }
        .unwrap_or("/");
        let cnonce = format!("{:016x}", fastrand::u64(..));
        let sess = self
            .algorithm
            .as_deref()
            .map_or(false, |a| a.eq_ignore_ascii_case("MD5-sess"));

        let mut ha1 = md5_hex(&format!("{}:{}:{}", self.principal, realm, self.password));
        if sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{}:{}", method, digest_uri));

        let qop_auth = self
            .qop
            .as_deref()
            .map_or(false, |q| q.split(',').any(|v| v.trim() == "auth"));

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.principal, realm, nonce, digest_uri
        );
        if qop_auth {
            let nc = format!("{:08x}", self.nc.fetch_add(1, Ordering::SeqCst) + 1);
            let response = md5_hex(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, nonce, nc, cnonce, ha2
            ));
            header.push_str(&format!(
                ", response=\"{}\", qop=auth, nc={}, cnonce=\"{}\"",
                response, nc, cnonce
            ));
        } else {
            let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));
            header.push_str(&format!(", response=\"{}\"", response));
        }
        if let Some(ref algorithm) = self.algorithm {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        if let Some(ref opaque) = self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        HeaderValue::from_str(&header).ok()
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("principal", &self.principal)
            .field("scheme", &self.scheme)
            .field("preemptive", &self.use_preemptive_auth)
            .field("realm", &self.realm_name)
            .finish()
    }
}

fn basic_auth(username: &str, password: &str) -> HeaderValue {
    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:{}", username, password);
    }
    let mut header = HeaderValue::from_bytes(&buf).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    header.set_sensitive(true);
    header
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

// name=value 或 name="value"，逗号分隔，引号内允许逗号
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(eq) => eq,
            None => break,
        };
        let name = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();
        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_owned();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_owned();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        params.push((name, value));
    }
    params
}

fn param(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}
