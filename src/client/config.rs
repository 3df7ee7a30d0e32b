//! 客户端配置与构建器

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::filter::IoExceptionFilter;
use super::pool::{ConnectionPool, LeaseStrategy, PoolSettings};
use super::proxy::ProxyServer;
use super::realm::Realm;
use super::sender::RequestSender;
use super::Client;
use crate::common::exec::Exec;
use crate::common::time::{Dur, Time};
use crate::rt::{Executor, Timer};
use crate::transport::Transport;

const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// 生效中的客户端配置。
///
/// 由 [`Builder`] 生成，之后只读。超时字段已经根据是否配置了定时器
/// 做过检查：没有定时器时，默认超时被禁用（`None`）。
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) max_connections_total: Option<usize>,
    pub(crate) max_connections_per_host: Option<usize>,
    pub(crate) allow_pooling_connections: bool,
    pub(crate) allow_pooling_ssl_connections: bool,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) max_retry: u32,
    pub(crate) follow_redirect: bool,
    pub(crate) max_redirects: u32,
    pub(crate) strict_302_handling: bool,
    pub(crate) keep_alive: bool,
    pub(crate) pooled_connection_idle_timeout: Option<Duration>,
    pub(crate) connection_ttl: Option<Duration>,
    pub(crate) pool_cleaner_period: Duration,
    pub(crate) lease_strategy: LeaseStrategy,
    pub(crate) user_agent: Option<String>,
    pub(crate) realm: Option<Realm>,
    pub(crate) proxy: Option<ProxyServer>,
    pub(crate) body_chunk_size: usize,
    pub(crate) io_exception_filters: Vec<Arc<dyn IoExceptionFilter>>,
}

impl Config {
    /// 全局连接数上限。
    pub fn max_connections_total(&self) -> Option<usize> {
        self.max_connections_total
    }

    /// 每个分区的连接数上限。
    pub fn max_connections_per_host(&self) -> Option<usize> {
        self.max_connections_per_host
    }

    /// 是否复用明文连接。
    pub fn allow_pooling_connections(&self) -> bool {
        self.allow_pooling_connections
    }

    /// 是否复用 TLS 连接。
    pub fn allow_pooling_ssl_connections(&self) -> bool {
        self.allow_pooling_ssl_connections
    }

    /// 建立连接超时。
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// 请求总超时。
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// 空闲（读）超时。
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// 最大重试次数。
    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// 是否跟随重定向。
    pub fn follow_redirect(&self) -> bool {
        self.follow_redirect
    }

    /// 最多跟随的重定向次数。
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// 302 是否严格保留原方法与 body。
    pub fn strict_302_handling(&self) -> bool {
        self.strict_302_handling
    }

    /// 是否请求保持连接。
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// 连接在池中的最长空闲时间。
    pub fn pooled_connection_idle_timeout(&self) -> Option<Duration> {
        self.pooled_connection_idle_timeout
    }

    /// 连接的最长存活时间。
    pub fn connection_ttl(&self) -> Option<Duration> {
        self.connection_ttl
    }

    /// 取出空闲连接的顺序。
    pub fn lease_strategy(&self) -> LeaseStrategy {
        self.lease_strategy
    }

    /// `User-Agent`。
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// 默认认证凭据。
    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    /// 默认代理。
    pub fn proxy(&self) -> Option<&ProxyServer> {
        self.proxy.as_ref()
    }

    /// 每次从请求体拉取的最大字节数。
    pub fn body_chunk_size(&self) -> usize {
        self.body_chunk_size
    }

    /// 已注册的 I/O 错误过滤器。
    pub fn io_exception_filters(&self) -> &[Arc<dyn IoExceptionFilter>] {
        &self.io_exception_filters
    }

    /// 某个 scheme 的连接是否允许放回连接池。
    pub(crate) fn allow_pooling(&self, secure: bool) -> bool {
        if secure {
            self.allow_pooling_ssl_connections
        } else {
            self.allow_pooling_connections
        }
    }
}

/// 客户端构建器。
///
/// **注意**：配置了任何超时都需要一个定时器，见 [`Builder::timer`]。
/// 默认的超时（连接 5 秒、请求 60 秒、空闲 60 秒、池中空闲 60 秒）在没有
/// 定时器时只会告警并被禁用；显式设置了超时却没有定时器则会 panic。
#[derive(Clone, Debug)]
pub struct Builder {
    exec: Exec,
    timer: Time,
    max_connections_total: Option<usize>,
    max_connections_per_host: Option<usize>,
    allow_pooling_connections: bool,
    allow_pooling_ssl_connections: bool,
    connect_timeout: Dur,
    request_timeout: Dur,
    read_timeout: Dur,
    max_retry: u32,
    follow_redirect: bool,
    max_redirects: u32,
    strict_302_handling: bool,
    keep_alive: bool,
    pooled_connection_idle_timeout: Dur,
    connection_ttl: Dur,
    pool_cleaner_period: Duration,
    lease_strategy: LeaseStrategy,
    user_agent: Option<String>,
    realm: Option<Realm>,
    proxy: Option<ProxyServer>,
    body_chunk_size: usize,
    io_exception_filters: Vec<Arc<dyn IoExceptionFilter>>,
}

impl Builder {
    /// 使用给定执行器创建构建器。
    pub fn new<E>(executor: E) -> Builder
    where
        E: Executor<Pin<Box<dyn Future<Output = ()> + Send>>> + Send + Sync + 'static,
    {
        Builder {
            exec: Exec::new(executor),
            timer: Time::Empty,
            max_connections_total: None,
            max_connections_per_host: None,
            allow_pooling_connections: true,
            allow_pooling_ssl_connections: true,
            connect_timeout: Dur::Default(Some(Duration::from_secs(5))),
            request_timeout: Dur::Default(Some(Duration::from_secs(60))),
            read_timeout: Dur::Default(Some(Duration::from_secs(60))),
            max_retry: 5,
            follow_redirect: false,
            max_redirects: 5,
            strict_302_handling: false,
            keep_alive: true,
            pooled_connection_idle_timeout: Dur::Default(Some(Duration::from_secs(60))),
            connection_ttl: Dur::Default(None),
            pool_cleaner_period: Duration::from_secs(1),
            lease_strategy: LeaseStrategy::Lifo,
            user_agent: Some(DEFAULT_USER_AGENT.to_owned()),
            realm: None,
            proxy: None,
            body_chunk_size: 8 * 1024,
            io_exception_filters: Vec::new(),
        }
    }

    /// 提供定时器。
    pub fn timer<M>(&mut self, timer: M) -> &mut Builder
    where
        M: Timer + Send + Sync + 'static,
    {
        self.timer = Time::Timer(Arc::new(timer));
        self
    }

    /// 全局连接数上限，`None` 表示不限制。
    pub fn max_connections_total(&mut self, max: impl Into<Option<usize>>) -> &mut Builder {
        self.max_connections_total = max.into();
        self
    }

    /// 每个分区的连接数上限，`None` 表示不限制。
    pub fn max_connections_per_host(&mut self, max: impl Into<Option<usize>>) -> &mut Builder {
        self.max_connections_per_host = max.into();
        self
    }

    /// 是否复用明文连接。默认 `true`。
    pub fn allow_pooling_connections(&mut self, enabled: bool) -> &mut Builder {
        self.allow_pooling_connections = enabled;
        self
    }

    /// 是否复用 TLS 连接。默认 `true`。
    pub fn allow_pooling_ssl_connections(&mut self, enabled: bool) -> &mut Builder {
        self.allow_pooling_ssl_connections = enabled;
        self
    }

    /// 建立连接超时，`None` 表示禁用。默认 5 秒。
    pub fn connect_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Builder {
        self.connect_timeout = Dur::Configured(timeout.into());
        self
    }

    /// 请求总超时，`None` 表示禁用。默认 60 秒。
    pub fn request_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Builder {
        self.request_timeout = Dur::Configured(timeout.into());
        self
    }

    /// 空闲（读）超时：连接上连续这么久没有任何事件即超时。默认 60 秒。
    pub fn read_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Builder {
        self.read_timeout = Dur::Configured(timeout.into());
        self
    }

    /// 最大重试次数。默认 5，0 表示不重试。
    pub fn max_retry(&mut self, max: u32) -> &mut Builder {
        self.max_retry = max;
        self
    }

    /// 是否跟随重定向。默认 `false`。
    pub fn follow_redirect(&mut self, enabled: bool) -> &mut Builder {
        self.follow_redirect = enabled;
        self
    }

    /// 最多跟随的重定向次数。默认 5。
    pub fn max_redirects(&mut self, max: u32) -> &mut Builder {
        self.max_redirects = max;
        self
    }

    /// 302 是否像 307 一样保留方法与 body。默认 `false`（改为 GET）。
    pub fn strict_302_handling(&mut self, enabled: bool) -> &mut Builder {
        self.strict_302_handling = enabled;
        self
    }

    /// 是否请求保持连接。默认 `true`。
    pub fn keep_alive(&mut self, enabled: bool) -> &mut Builder {
        self.keep_alive = enabled;
        self
    }

    /// 连接在池中的最长空闲时间。默认 60 秒。
    pub fn pooled_connection_idle_timeout(
        &mut self,
        timeout: impl Into<Option<Duration>>,
    ) -> &mut Builder {
        self.pooled_connection_idle_timeout = Dur::Configured(timeout.into());
        self
    }

    /// 连接的最长存活时间，超过后不再被复用。默认不限制。
    pub fn connection_ttl(&mut self, ttl: impl Into<Option<Duration>>) -> &mut Builder {
        self.connection_ttl = Dur::Configured(ttl.into());
        self
    }

    /// 连接池清理任务的运行间隔。默认 1 秒。
    pub fn pool_cleaner_period(&mut self, period: Duration) -> &mut Builder {
        self.pool_cleaner_period = period;
        self
    }

    /// 取出空闲连接的顺序。默认 LIFO。
    pub fn lease_strategy(&mut self, strategy: LeaseStrategy) -> &mut Builder {
        self.lease_strategy = strategy;
        self
    }

    /// `User-Agent`，`None` 表示不发送。
    pub fn user_agent(&mut self, agent: impl Into<Option<String>>) -> &mut Builder {
        self.user_agent = agent.into();
        self
    }

    /// 默认认证凭据。
    pub fn realm(&mut self, realm: Realm) -> &mut Builder {
        self.realm = Some(realm);
        self
    }

    /// 默认代理。
    pub fn proxy(&mut self, proxy: ProxyServer) -> &mut Builder {
        self.proxy = Some(proxy);
        self
    }

    /// 每次从请求体拉取的最大字节数。默认 8KB。
    pub fn body_chunk_size(&mut self, size: usize) -> &mut Builder {
        self.body_chunk_size = size.max(1);
        self
    }

    /// 注册一个 I/O 错误过滤器，见 [`IoExceptionFilter`]。
    pub fn io_exception_filter<F>(&mut self, filter: F) -> &mut Builder
    where
        F: IoExceptionFilter,
    {
        self.io_exception_filters.push(Arc::new(filter));
        self
    }

    /// 生效配置。
    ///
    /// # Panics
    ///
    /// 显式设置了超时但没有配置定时器。
    pub fn config(&self) -> Config {
        let time = &self.timer;
        Config {
            max_connections_total: self.max_connections_total,
            max_connections_per_host: self.max_connections_per_host,
            allow_pooling_connections: self.allow_pooling_connections,
            allow_pooling_ssl_connections: self.allow_pooling_ssl_connections,
            connect_timeout: time.check(self.connect_timeout, "connect_timeout"),
            request_timeout: time.check(self.request_timeout, "request_timeout"),
            read_timeout: time.check(self.read_timeout, "read_timeout"),
            max_retry: self.max_retry,
            follow_redirect: self.follow_redirect,
            max_redirects: self.max_redirects,
            strict_302_handling: self.strict_302_handling,
            keep_alive: self.keep_alive,
            pooled_connection_idle_timeout: time.check(
                self.pooled_connection_idle_timeout,
                "pooled_connection_idle_timeout",
            ),
            // TTL 在取出 / 归还时按时钟判断，不需要定时器
            connection_ttl: self.connection_ttl.get(),
            pool_cleaner_period: self.pool_cleaner_period,
            lease_strategy: self.lease_strategy,
            user_agent: self.user_agent.clone(),
            realm: self.realm.clone(),
            proxy: self.proxy.clone(),
            body_chunk_size: self.body_chunk_size,
            io_exception_filters: self.io_exception_filters.clone(),
        }
    }

    /// 以给定传输层构建客户端。
    ///
    /// # Panics
    ///
    /// 显式设置了超时但没有配置定时器。
    pub fn build<T>(&self, transport: T) -> Client
    where
        T: Transport,
    {
        let config = Arc::new(self.config());
        let pool = ConnectionPool::new(
            PoolSettings {
                max_connections_total: config.max_connections_total,
                max_connections_per_host: config.max_connections_per_host,
                idle_timeout: config.pooled_connection_idle_timeout,
                ttl: config.connection_ttl,
                lease_strategy: config.lease_strategy,
                cleaner_period: config.pool_cleaner_period,
            },
            self.timer.clone(),
        );
        pool.spawn_cleaner(&self.exec);
        debug!("client built: {:?}", config);
        Client {
            sender: Arc::new(RequestSender::new(
                config,
                Arc::new(transport),
                pool,
                self.exec.clone(),
                self.timer.clone(),
            )),
        }
    }
}
