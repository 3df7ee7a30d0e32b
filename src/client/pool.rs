//! 连接池
//!
//! 空闲连接按 [`PartitionKey`]（scheme、主机、端口、代理、虚拟主机）分区保存，
//! 同一分区内的连接可以互相替换。
//!
//! - [`poll`](ConnectionPool::poll) 取出一个连接，取出时重新校验：连接必须仍然打开，
//!   且空闲期间没有收到关闭或出错事件；不合格的连接被直接关闭丢弃；
//! - [`offer`](ConnectionPool::offer) 归还连接，池已关闭、连接已关闭或超过 TTL 时拒绝；
//! - 连接数上限（全局与每分区）通过 RAII 的 [`Permit`] 实施，连接被丢弃时许可自动释放；
//! - 配置了空闲超时或 TTL 时，后台清理任务会定期淘汰过期连接。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use http::Uri;
use tokio::sync::mpsc::error::TryRecvError;

use super::proxy::ProxyServer;
use crate::common::exec::Exec;
use crate::common::time::Time;
use crate::error::Parse;
use crate::transport::{Channel, ChannelEvent, ChannelId, Connected, EventReceiver};

/// 取出空闲连接的顺序。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LeaseStrategy {
    /// 最近归还的先被取出，让多余的连接自然空闲超时。
    #[default]
    Lifo,
    /// 最早归还的先被取出。
    Fifo,
}

/// 连接分区键。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    scheme: String,
    host: String,
    port: u16,
    proxy: Option<(String, u16)>,
    virtual_host: Option<String>,
}

impl PartitionKey {
    /// 直连目标的分区键。
    pub fn new(scheme: &str, host: &str, port: u16) -> PartitionKey {
        PartitionKey {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
            proxy: None,
            virtual_host: None,
        }
    }

    /// 经由代理。
    pub fn with_proxy(mut self, host: &str, port: u16) -> PartitionKey {
        self.proxy = Some((host.to_ascii_lowercase(), port));
        self
    }

    /// 带虚拟主机。
    pub fn with_virtual_host(mut self, virtual_host: &str) -> PartitionKey {
        self.virtual_host = Some(virtual_host.to_ascii_lowercase());
        self
    }

    pub(crate) fn for_uri(
        uri: &Uri,
        proxy: Option<&ProxyServer>,
        virtual_host: Option<&str>,
    ) -> crate::Result<PartitionKey> {
        let scheme = uri.scheme_str().ok_or(Parse::Uri)?;
        let host = uri.host().ok_or(Parse::Uri)?;
        let mut key = PartitionKey::new(scheme, host, default_port(uri));
        if let Some(proxy) = proxy {
            key = key.with_proxy(proxy.host(), proxy.port());
        }
        if let Some(vh) = virtual_host {
            key = key.with_virtual_host(vh);
        }
        Ok(key)
    }

    /// scheme。
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 目标主机。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 目标端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 目标是否为 https。
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some((ref host, port)) = self.proxy {
            write!(f, " via {}:{}", host, port)?;
        }
        if let Some(ref vh) = self.virtual_host {
            write!(f, " as {}", vh)?;
        }
        Ok(())
    }
}

pub(crate) fn default_port(uri: &Uri) -> u16 {
    uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    })
}

/// 连接池的配置。
#[derive(Clone, Debug)]
pub(crate) struct PoolSettings {
    pub(crate) max_connections_total: Option<usize>,
    pub(crate) max_connections_per_host: Option<usize>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) lease_strategy: LeaseStrategy,
    pub(crate) cleaner_period: Duration,
}

/// 一条连接及其响应事件流。
///
/// 连接被丢弃时会关闭底层通道并释放连接数许可。
pub struct Connection {
    channel: Arc<dyn Channel>,
    events: EventReceiver,
    created: Instant,
    permit: Permit,
}

impl Connection {
    pub(crate) fn new(connected: Connected, permit: Permit, created: Instant) -> Connection {
        Connection {
            channel: connected.channel,
            events: connected.events,
            created,
            permit,
        }
    }

    /// 连接标识。
    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    /// 底层通道。
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// 所属分区。
    pub fn key(&self) -> &PartitionKey {
        &self.permit.key
    }

    /// 连接是否仍然打开。
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// 建立时间。
    pub fn created(&self) -> Instant {
        self.created
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventReceiver {
        &mut self.events
    }

    /// 空闲期间不应收到任何事件；收到关闭、出错或意外数据都说明连接已不可用。
    fn revalidate(&mut self) -> bool {
        if !self.channel.is_open() {
            return false;
        }
        match self.events.try_recv() {
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => false,
            Ok(ChannelEvent::Closed) | Ok(ChannelEvent::Error(_)) => false,
            Ok(_) => {
                debug!("unexpected data on idle connection {}", self.id());
                false
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.channel.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("key", self.key())
            .finish()
    }
}

struct Limits {
    max_total: Option<usize>,
    max_per_host: Option<usize>,
    counts: Mutex<LimitCounts>,
}

#[derive(Default)]
struct LimitCounts {
    total: usize,
    per_host: HashMap<PartitionKey, usize>,
}

/// 一个连接数许可，被丢弃时归还。
pub(crate) struct Permit {
    limits: Arc<Limits>,
    key: PartitionKey,
}

impl Limits {
    fn lock(&self) -> MutexGuard<'_, LimitCounts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut counts = self.limits.lock();
        counts.total = counts.total.saturating_sub(1);
        if let Some(n) = counts.per_host.get_mut(&self.key) {
            *n -= 1;
            if *n == 0 {
                counts.per_host.remove(&self.key);
            }
        }
    }
}

/// 按分区保存空闲连接的连接池。
///
/// `ConnectionPool` 可以廉价克隆，克隆之间共享同一个池。
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<HashMap<PartitionKey, VecDeque<Idle>>>,
    closed: AtomicBool,
    limits: Arc<Limits>,
    settings: PoolSettings,
    time: Time,
}

struct Idle {
    conn: Connection,
    since: Instant,
}

impl ConnectionPool {
    pub(crate) fn new(settings: PoolSettings, time: Time) -> ConnectionPool {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                limits: Arc::new(Limits {
                    max_total: settings.max_connections_total,
                    max_per_host: settings.max_connections_per_host,
                    counts: Mutex::new(LimitCounts::default()),
                }),
                settings,
                time,
            }),
        }
    }

    /// 为分区 `key` 申请一个新连接的许可。
    ///
    /// 超过上限时立即失败，不会等待。
    pub(crate) fn acquire(&self, key: &PartitionKey) -> crate::Result<Permit> {
        let limits = &self.inner.limits;
        let mut counts = limits.lock();
        if let Some(max) = limits.max_total {
            if counts.total >= max {
                debug!("max connections total reached: {}", max);
                return Err(crate::Error::new_too_many_connections(format!(
                    "too many connections: {}",
                    max
                )));
            }
        }
        if let Some(max) = limits.max_per_host {
            if counts.per_host.get(key).copied().unwrap_or(0) >= max {
                debug!("max connections per host reached for {}: {}", key, max);
                return Err(crate::Error::new_too_many_connections(format!(
                    "too many connections per host: {} for {}",
                    max, key
                )));
            }
        }
        counts.total += 1;
        *counts.per_host.entry(key.clone()).or_insert(0) += 1;
        Ok(Permit {
            limits: limits.clone(),
            key: key.clone(),
        })
    }

    /// 当前存活（空闲或使用中）的连接数。
    pub fn open_connections(&self) -> usize {
        self.inner.limits.lock().total
    }

    /// 从分区 `key` 取出一个健康的空闲连接。
    pub fn poll(&self, key: &PartitionKey) -> Option<Connection> {
        if !self.is_open() {
            return None;
        }
        let now = self.inner.time.now();
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.inner.lock();
            let mut found = None;
            if let Some(deque) = idle.get_mut(key) {
                loop {
                    let entry = match self.inner.settings.lease_strategy {
                        LeaseStrategy::Lifo => deque.pop_front(),
                        LeaseStrategy::Fifo => deque.pop_back(),
                    };
                    let mut entry = match entry {
                        Some(entry) => entry,
                        None => break,
                    };
                    if self.inner.is_expired(&entry, now) || !entry.conn.revalidate() {
                        stale.push(entry.conn);
                        continue;
                    }
                    found = Some(entry.conn);
                    break;
                }
                if deque.is_empty() {
                    idle.remove(key);
                }
            }
            found
        };

        if !stale.is_empty() {
            debug!("pool discarded {} stale connection(s) for {}", stale.len(), key);
        }
        drop(stale);
        if let Some(ref conn) = found {
            trace!("pool hit {} for {}", conn.id(), key);
        }
        found
    }

    /// 归还一个连接。返回 `false` 时连接已被关闭。
    pub fn offer(&self, conn: Connection) -> bool {
        if !self.is_open() {
            return false;
        }
        let now = self.inner.time.now();
        if let Some(ttl) = self.inner.settings.ttl {
            if now.saturating_duration_since(conn.created) >= ttl {
                debug!("connection {} exceeded ttl, not pooled", conn.id());
                return false;
            }
        }
        if !conn.is_open() {
            return false;
        }

        let key = conn.key().clone();
        trace!("pool offer {} for {}", conn.id(), key);
        let mut idle = self.inner.lock();
        // destroy() 可能在上面的检查之后发生
        if !self.is_open() {
            drop(idle);
            return false;
        }
        idle.entry(key)
            .or_default()
            .push_front(Idle { conn, since: now });
        true
    }

    /// 从池中移除指定连接（如果它正处于空闲状态）。
    pub fn remove_all(&self, id: ChannelId) -> bool {
        let removed = {
            let mut idle = self.inner.lock();
            let mut removed = None;
            for deque in idle.values_mut() {
                if let Some(pos) = deque.iter().position(|e| e.conn.id() == id) {
                    removed = deque.remove(pos);
                    break;
                }
            }
            idle.retain(|_, deque| !deque.is_empty());
            removed
        };
        removed.is_some()
    }

    /// 池是否仍然接收连接。
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// 关闭连接池，关闭所有空闲连接。之后的 `offer` 都会被拒绝。
    pub fn destroy(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained = std::mem::take(&mut *self.inner.lock());
        debug!("pool destroyed, closing {} partition(s)", drained.len());
        drop(drained);
    }

    /// 丢弃所有满足 `predicate` 的分区。
    pub fn flush_partitions<F>(&self, mut predicate: F)
    where
        F: FnMut(&PartitionKey) -> bool,
    {
        let mut flushed = Vec::new();
        {
            let mut idle = self.inner.lock();
            let keys: Vec<PartitionKey> = idle.keys().filter(|k| predicate(k)).cloned().collect();
            for key in keys {
                if let Some(deque) = idle.remove(&key) {
                    flushed.push(deque);
                }
            }
        }
        drop(flushed);
    }

    /// 空闲连接总数。
    pub fn idle_count(&self) -> usize {
        self.inner.lock().values().map(VecDeque::len).sum()
    }

    /// 每个主机的空闲连接数。
    pub fn idle_count_per_host(&self) -> HashMap<String, usize> {
        let idle = self.inner.lock();
        let mut counts = HashMap::new();
        for (key, deque) in idle.iter() {
            *counts.entry(key.host().to_owned()).or_insert(0) += deque.len();
        }
        counts
    }

    /// 淘汰过期或已关闭的空闲连接，返回淘汰数量。
    pub(crate) fn evict_expired(&self) -> usize {
        let now = self.inner.time.now();
        let mut evicted = Vec::new();
        {
            let mut idle = self.inner.lock();
            for deque in idle.values_mut() {
                let mut kept = VecDeque::with_capacity(deque.len());
                while let Some(mut entry) = deque.pop_front() {
                    if self.inner.is_expired(&entry, now) || !entry.conn.revalidate() {
                        evicted.push(entry.conn);
                    } else {
                        kept.push_back(entry);
                    }
                }
                *deque = kept;
            }
            idle.retain(|_, deque| !deque.is_empty());
        }
        let n = evicted.len();
        if n > 0 {
            debug!("pool cleaner evicted {} connection(s)", n);
        }
        n
    }

    /// 配置了空闲超时或 TTL 时，启动定期清理任务。
    ///
    /// 任务只持有池的弱引用，池被关闭或释放后自行退出。
    pub(crate) fn spawn_cleaner(&self, exec: &Exec) {
        let settings = &self.inner.settings;
        if settings.idle_timeout.is_none() && settings.ttl.is_none() {
            return;
        }
        if !self.inner.time.is_set() {
            return;
        }
        let period = settings.cleaner_period;
        let time = self.inner.time.clone();
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        exec.execute(async move {
            loop {
                time.sleep(period).await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                let pool = ConnectionPool { inner };
                if !pool.is_open() {
                    return;
                }
                pool.evict_expired();
            }
        });
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<PartitionKey, VecDeque<Idle>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &Idle, now: Instant) -> bool {
        if let Some(timeout) = self.settings.idle_timeout {
            if now.saturating_duration_since(entry.since) >= timeout {
                return true;
            }
        }
        if let Some(ttl) = self.settings.ttl {
            if now.saturating_duration_since(entry.conn.created) >= ttl {
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("open", &self.is_open())
            .field("idle", &self.idle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{event_channel, BoxFuture, EventSender};
    use bytes::Bytes;
    use std::io;

    struct TestChannel {
        id: ChannelId,
        open: AtomicBool,
    }

    impl Channel for TestChannel {
        fn id(&self) -> ChannelId {
            self.id
        }

        fn write(&self, _buf: Bytes) -> BoxFuture<'static, io::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            max_connections_total: Some(3),
            max_connections_per_host: Some(2),
            idle_timeout: None,
            ttl: None,
            lease_strategy: LeaseStrategy::Lifo,
            cleaner_period: Duration::from_secs(1),
        }
    }

    fn key(host: &str) -> PartitionKey {
        PartitionKey::new("http", host, 80)
    }

    fn connect(pool: &ConnectionPool, key: &PartitionKey) -> (Connection, EventSender) {
        let permit = pool.acquire(key).unwrap();
        let (tx, rx) = event_channel();
        let channel = Arc::new(TestChannel {
            id: ChannelId::next(),
            open: AtomicBool::new(true),
        });
        let conn = Connection::new(
            Connected {
                channel,
                events: rx,
            },
            permit,
            Instant::now(),
        );
        (conn, tx)
    }

    #[test]
    fn offer_then_poll_same_partition() {
        let pool = ConnectionPool::new(settings(), Time::Empty);
        let a = key("a");
        let (conn, _tx) = connect(&pool, &a);
        let id = conn.id();

        assert!(pool.offer(conn));
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.poll(&key("b")).is_none());
        assert_eq!(pool.poll(&a).map(|c| c.id()), Some(id));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn scheme_splits_partitions() {
        let http = PartitionKey::new("http", "h", 80);
        let https = PartitionKey::new("https", "h", 80);
        assert_ne!(http, https);
        let proxied = PartitionKey::new("http", "h", 80).with_proxy("p", 3128);
        assert_ne!(http, proxied);
    }

    #[test]
    fn lease_strategy_order() {
        let a = key("a");
        for (strategy, expect_first) in [(LeaseStrategy::Lifo, 1), (LeaseStrategy::Fifo, 0)] {
            let mut s = settings();
            s.lease_strategy = strategy;
            let pool = ConnectionPool::new(s, Time::Empty);
            let (c0, _t0) = connect(&pool, &a);
            let (c1, _t1) = connect(&pool, &a);
            let ids = [c0.id(), c1.id()];
            pool.offer(c0);
            pool.offer(c1);
            assert_eq!(pool.poll(&a).unwrap().id(), ids[expect_first]);
        }
    }

    #[test]
    fn stale_connections_are_discarded() {
        let pool = ConnectionPool::new(settings(), Time::Empty);
        let a = key("a");
        let (conn, tx) = connect(&pool, &a);
        pool.offer(conn);
        tx.send(ChannelEvent::Closed).unwrap();
        assert!(pool.poll(&a).is_none());
        assert_eq!(pool.open_connections(), 0);
    }

    #[test]
    fn limits_fail_fast_and_release_on_drop() {
        let pool = ConnectionPool::new(settings(), Time::Empty);
        let a = key("a");
        let (c0, _t0) = connect(&pool, &a);
        let (_c1, _t1) = connect(&pool, &a);
        let err = pool.acquire(&a).err().unwrap();
        assert!(err.is_too_many_connections());

        let (_c2, _t2) = connect(&pool, &key("b"));
        assert!(pool.acquire(&key("c")).err().unwrap().is_too_many_connections());

        drop(c0);
        assert!(pool.acquire(&a).is_ok());
    }

    #[test]
    fn destroy_rejects_offers() {
        let pool = ConnectionPool::new(settings(), Time::Empty);
        let a = key("a");
        let (c0, _t0) = connect(&pool, &a);
        let (c1, _t1) = connect(&pool, &a);
        let channel = c0.channel().clone();
        pool.offer(c0);
        pool.destroy();
        assert!(!channel.is_open());
        assert!(!pool.offer(c1));
        assert!(!pool.is_open());
    }

    #[test]
    fn remove_and_flush() {
        let pool = ConnectionPool::new(settings(), Time::Empty);
        let (c0, _t0) = connect(&pool, &key("a"));
        let (c1, _t1) = connect(&pool, &key("b"));
        let id = c0.id();
        pool.offer(c0);
        pool.offer(c1);
        assert_eq!(pool.idle_count_per_host().get("a"), Some(&1));

        assert!(pool.remove_all(id));
        assert!(!pool.remove_all(id));
        pool.flush_partitions(|k| k.host() == "b");
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_timeout_and_ttl_expire() {
        let mut s = settings();
        s.idle_timeout = Some(Duration::from_millis(0));
        let pool = ConnectionPool::new(s, Time::Empty);
        let a = key("a");
        let (c0, _t0) = connect(&pool, &a);
        pool.offer(c0);
        assert_eq!(pool.evict_expired(), 1);

        let mut s = settings();
        s.ttl = Some(Duration::from_millis(0));
        let pool = ConnectionPool::new(s, Time::Empty);
        let (c1, _t1) = connect(&pool, &a);
        assert!(!pool.offer(c1));
    }
}
