use super::realm::Realm;

/// 一个 HTTP 代理。
///
/// 目标为 `http` 时，请求以 absolute-form 直接发给代理；目标为 `https` 时，
/// 先向代理发送 `CONNECT host:port` 建立隧道，再在隧道上进行 TLS 握手。
#[derive(Clone, Debug)]
pub struct ProxyServer {
    host: String,
    port: u16,
    secured: bool,
    realm: Option<Realm>,
    non_proxy_hosts: Vec<String>,
}

impl ProxyServer {
    /// 新建一个明文 HTTP 代理。
    pub fn new(host: impl Into<String>, port: u16) -> ProxyServer {
        ProxyServer {
            host: host.into(),
            port,
            secured: false,
            realm: None,
            non_proxy_hosts: Vec::new(),
        }
    }

    /// 与代理之间本身是否使用 TLS。
    pub fn secured(mut self, secured: bool) -> ProxyServer {
        self.secured = secured;
        self
    }

    /// 代理认证凭据，用于应答 `407`。
    pub fn realm(mut self, realm: Realm) -> ProxyServer {
        self.realm = Some(realm);
        self
    }

    /// 不经过代理的主机，支持 `*.example.com` 形式的后缀匹配。
    pub fn non_proxy_host(mut self, pattern: impl Into<String>) -> ProxyServer {
        self.non_proxy_hosts.push(pattern.into());
        self
    }

    /// 代理主机。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 代理端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 与代理之间是否使用 TLS。
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// 代理认证凭据。
    pub fn proxy_realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    /// 访问 `host` 时是否应绕过此代理。
    pub fn is_ignored_for_host(&self, host: &str) -> bool {
        self.non_proxy_hosts.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                host.len() >= suffix.len()
                    && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            } else {
                pattern.eq_ignore_ascii_case(host)
            }
        })
    }
}

/// 对给定主机生效的代理：请求上的覆盖优先，其次是客户端配置。
pub(crate) fn resolve<'a>(
    request: Option<&'a ProxyServer>,
    config: Option<&'a ProxyServer>,
    host: &str,
) -> Option<&'a ProxyServer> {
    request
        .or(config)
        .filter(|proxy| !proxy.is_ignored_for_host(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_proxy_hosts() {
        let proxy = ProxyServer::new("proxy", 3128)
            .non_proxy_host("localhost")
            .non_proxy_host("*.internal.example");
        assert!(proxy.is_ignored_for_host("LOCALHOST"));
        assert!(proxy.is_ignored_for_host("api.internal.example"));
        assert!(!proxy.is_ignored_for_host("example.com"));

        assert!(resolve(None, Some(&proxy), "localhost").is_none());
        assert_eq!(
            resolve(None, Some(&proxy), "example.com").map(|p| p.port()),
            Some(3128)
        );
    }
}
