//! 请求编排
//!
//! `RequestSender` 为每个提交的请求派发一个驱动任务。驱动任务以"尝试"为单位
//! 循环：每次尝试取得一个连接（复用上一次的、从连接池取出，或新建），写出
//! 请求头与 body，然后消费连接上的响应事件，直到以下之一发生：
//!
//! - 响应完整结束：完成请求，连接归还连接池或关闭；
//! - 需要跟随重定向或应答认证质询：切换当前请求，开始下一次尝试；
//! - 出错：在状态行到达之前的连接级失败且仍可重放时重试，否则终止请求；
//! - 请求被其他方终止（取消、超时）：放弃连接，结束驱动。

use std::future::Future;
use std::io;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;

use bytes::Bytes;
use futures_util::future::{self, Either};
use http::header::{HeaderMap, HeaderValue, PROXY_AUTHENTICATE, WWW_AUTHENTICATE};
use http::{Method, StatusCode, Uri};

use super::config::Config;
use super::future::{CachedHead, ChannelState, RequestFuture};
use super::handler::{AsyncHandler, BodyPart, ResponseStatus, State};
use super::pool::{Connection, ConnectionPool, PartitionKey};
use super::proxy::{self, ProxyServer};
use super::realm::Realm;
use super::redirect;
use super::request::Request;
use super::timeout;
use super::wire::{self, Framing, Head};
use crate::body::{Body, BodyState, ChunkBuf};
use crate::common::exec::Exec;
use crate::common::future::poll_fn;
use crate::common::time::Time;
use crate::error::Parse;
use crate::transport::{ChannelEvent, ConnectTarget, StatusLine, Transport};
use crate::{Error, TimeoutKind};

pub(crate) struct RequestSender {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    pool: ConnectionPool,
    exec: Exec,
    time: Time,
    closed: AtomicBool,
}

/// 建立 `CONNECT` 隧道的结果。
enum Tunnel {
    Established,
    /// 需要在新连接上重发 `CONNECT`。
    Reconnect,
    /// 请求已经终止。
    Terminated,
}

/// 一次尝试之后驱动循环的走向。
enum Next {
    /// 请求已经终止。
    Done,
    /// 以（可能已更新的）当前请求再试一次。
    Again,
}

impl RequestSender {
    pub(crate) fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        pool: ConnectionPool,
        exec: Exec,
        time: Time,
    ) -> RequestSender {
        RequestSender {
            config,
            transport,
            pool,
            exec,
            time,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("client closed");
            self.pool.destroy();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 提交请求，派发驱动任务。
    pub(crate) fn send<H>(self: &Arc<Self>, request: Request, handler: H) -> RequestFuture<H::Output>
    where
        H: AsyncHandler,
    {
        let timeout = request.request_timeout().or(self.config.request_timeout);
        let fut = RequestFuture::new(
            request,
            Box::new(handler),
            self.config.max_retry,
            self.time.clone(),
        );
        if self.is_closed() {
            fut.abort(Error::new_closed());
            return fut;
        }

        timeout::schedule_request_timeout(&fut, &self.exec, &self.time, timeout);

        let sender = self.clone();
        let driven = fut.clone();
        self.exec.execute(async move { sender.drive(driven).await });
        fut
    }

    async fn drive<T>(self: Arc<Self>, fut: RequestFuture<T>)
    where
        T: Send + 'static,
    {
        let mut reusable: Option<Connection> = None;
        loop {
            match self.attempt(&fut, &mut reusable).await {
                Ok(Next::Done) => return,
                Ok(Next::Again) => {}
                Err(err) => {
                    if self.should_retry(&fut, &err) {
                        debug!(
                            "retrying request after error ({} of {}): {:?}",
                            fut.current_retry(),
                            self.config.max_retry,
                            err
                        );
                        reusable = None;
                        fut.set_state(ChannelState::Reconnected);
                        fut.with_handler(|h| {
                            if let Some(events) = h.connection_events() {
                                events.on_retry();
                            }
                        });
                        continue;
                    }
                    fut.abort(err);
                    return;
                }
            }
        }
    }

    fn should_retry<T>(&self, fut: &RequestFuture<T>, err: &Error) -> bool
    where
        T: Send + 'static,
    {
        if fut.is_done() || self.is_closed() {
            return false;
        }
        if !is_retryable(err) && !self.filters_replay(fut, err) {
            return false;
        }
        fut.is_replay_possible() && fut.increment_retry_and_check()
    }

    /// 询问配置的 I/O 错误过滤器是否要重放请求。
    fn filters_replay<T>(&self, fut: &RequestFuture<T>, err: &Error) -> bool
    where
        T: Send + 'static,
    {
        let io = match err.io_source() {
            Some(io) => io,
            None => return false,
        };
        if self.config.io_exception_filters.is_empty() {
            return false;
        }
        let request = fut.current_request();
        self.config
            .io_exception_filters
            .iter()
            .any(|filter| filter.replay(&request, io))
    }

    async fn attempt<T>(
        &self,
        fut: &RequestFuture<T>,
        reusable: &mut Option<Connection>,
    ) -> crate::Result<Next>
    where
        T: Send + 'static,
    {
        let request = fut.current_request();
        let uri = request.full_uri()?;
        let host = uri.host().ok_or(Parse::Uri)?.to_owned();
        let proxy = proxy::resolve(request.proxy(), self.config.proxy.as_ref(), &host).cloned();
        let key = PartitionKey::for_uri(&uri, proxy.as_ref(), request.virtual_host())?;
        let tunnel = proxy.is_some() && key.is_secure();

        let previous = reusable.take();
        let mut conn = match self
            .obtain(fut, previous, &key, proxy.as_ref(), tunnel, &request)
            .await?
        {
            Some(conn) => conn,
            None => return Ok(Next::Done),
        };
        if !fut.attach_channel(conn.channel().clone(), key.clone()) {
            return Ok(Next::Done);
        }
        fut.touch();

        // 请求头
        let mut body = match request.body_generator() {
            Some(generator) => Some(generator.create_body()?),
            None => None,
        };
        let framing = match body {
            Some(ref body) => match body.content_length() {
                Some(len) => Framing::Length(len),
                None => Framing::Chunked,
            },
            None => Framing::Empty,
        };
        let cached = match fut.first_head() {
            Some(cached) => cached,
            None => {
                let authorization = self.authorization(fut, &request, &uri);
                let proxy_authorization = match proxy {
                    Some(ref proxy) if !tunnel => self.proxy_authorization(fut, proxy, &request, &uri),
                    _ => None,
                };
                let cached = CachedHead {
                    sent_auth: authorization.is_some(),
                    sent_proxy_auth: proxy_authorization.is_some(),
                    head: Head {
                        request: &request,
                        uri: &uri,
                        absolute_form: proxy.is_some() && !tunnel,
                        framing,
                        keep_alive: self.config.keep_alive,
                        user_agent: self.config.user_agent(),
                        authorization,
                        proxy_authorization,
                    }
                    .encode(),
                };
                fut.set_first_head(cached.clone());
                cached
            }
        };

        fut.with_handler(|h| {
            if let Some(events) = h.connection_events() {
                events.on_request_send(&request);
            }
        });
        trace!("sending {} {} on {}", request.method(), uri, conn.id());
        if !self.write(fut, &conn, cached.head, Error::new_io).await? {
            return Ok(Next::Done);
        }
        let read_timeout = request.read_timeout().or(self.config.read_timeout);
        timeout::schedule_idle_timeout(fut, &self.exec, &self.time, read_timeout);

        // 请求 body
        if let Some(ref mut body) = body {
            let chunked = framing == Framing::Chunked;
            if !self.write_body(fut, &conn, &mut **body, chunked).await? {
                return Ok(Next::Done);
            }
        }

        // 响应
        let mut status: Option<StatusLine> = None;
        let mut interim = false;
        let mut delivering = false;
        let mut keep_alive = false;
        loop {
            let event = match until_terminated(fut, conn.events_mut().recv()).await {
                Some(event) => event,
                None => return Ok(Next::Done),
            };
            fut.touch();

            match event {
                Some(ChannelEvent::Status(line)) => {
                    if line.status.is_informational() {
                        trace!("skipping informational response {}", line.status);
                        interim = true;
                        continue;
                    }
                    fut.set_status_received();
                    status = Some(line);
                }
                Some(ChannelEvent::Headers(headers)) => {
                    if interim {
                        interim = false;
                        continue;
                    }
                    let line = status.as_ref().ok_or(Parse::Status)?;
                    keep_alive = self.config.keep_alive
                        && crate::headers::response_keep_alive(line.version, &headers);

                    let follow = request
                        .follow_redirect()
                        .unwrap_or(self.config.follow_redirect);
                    if follow {
                        if let Some(next) = redirect::next_request(
                            &request,
                            &uri,
                            line.status,
                            &headers,
                            self.config.strict_302_handling,
                        )? {
                            if fut.increment_and_get_redirect_count() > self.config.max_redirects {
                                return Err(Error::new_too_many_redirects(self.config.max_redirects));
                            }
                            debug!("following {} redirect to {}", line.status, next.uri());
                            fut.set_in_auth(false);
                            fut.set_in_proxy_auth(false);
                            fut.set_realm(None);
                            fut.set_proxy_realm(None);
                            fut.set_current_request(next);
                            return self.finish_exchange(fut, conn, reusable, keep_alive).await;
                        }
                    }

                    if line.status == StatusCode::UNAUTHORIZED {
                        if let Some(realm) = self.realm_for(fut, &request) {
                            if cached.sent_auth || fut.is_in_auth() {
                                return Err(Error::new_auth_failed(line.status));
                            }
                            if let Some(negotiated) =
                                realm.with_challenge(headers.get_all(WWW_AUTHENTICATE))
                            {
                                debug!("answering {:?} challenge from {}", negotiated.scheme(), host);
                                fut.set_realm(Some(negotiated));
                                fut.set_in_auth(true);
                                fut.set_current_request(request.clone());
                                return self.finish_exchange(fut, conn, reusable, keep_alive).await;
                            }
                        }
                    }

                    if line.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                        if let Some(realm) = proxy.as_ref().and_then(|p| self.proxy_realm_for(fut, p)) {
                            if cached.sent_proxy_auth || fut.is_in_proxy_auth() {
                                return Err(Error::new_auth_failed(line.status));
                            }
                            if let Some(negotiated) =
                                realm.with_challenge(headers.get_all(PROXY_AUTHENTICATE))
                            {
                                debug!("answering proxy {:?} challenge", negotiated.scheme());
                                fut.set_proxy_realm(Some(negotiated));
                                fut.set_in_proxy_auth(true);
                                fut.set_current_request(request.clone());
                                return self.finish_exchange(fut, conn, reusable, keep_alive).await;
                            }
                        }
                    }

                    fut.set_keep_alive(keep_alive);
                    let response_status = ResponseStatus {
                        status: line.status,
                        version: line.version,
                        reason: line.reason.clone(),
                        uri: uri.clone(),
                        remote_addr: conn.channel().remote_addr(),
                    };
                    let state = fut.with_handler(|h| match h.on_status(&response_status) {
                        State::Abort => State::Abort,
                        State::Continue => h.on_headers(&headers),
                    });
                    match state {
                        Some(State::Continue) => delivering = true,
                        Some(State::Abort) => {
                            debug!("handler aborted on {}", line.status);
                            fut.done();
                            return Ok(Next::Done);
                        }
                        None => return Ok(Next::Done),
                    }
                }
                Some(ChannelEvent::BodyPart { chunk, last }) => {
                    if !delivering {
                        continue;
                    }
                    let part = BodyPart { chunk, last };
                    match fut.with_handler(|h| h.on_body_part(&part)) {
                        Some(State::Continue) => {}
                        Some(State::Abort) => {
                            debug!("handler aborted during body");
                            fut.done();
                            return Ok(Next::Done);
                        }
                        None => return Ok(Next::Done),
                    }
                    if last {
                        self.complete(fut, conn);
                        return Ok(Next::Done);
                    }
                }
                Some(ChannelEvent::Closed) | None => {
                    return Err(if status.is_none() {
                        Error::new_remotely_closed()
                    } else {
                        Error::new_incomplete()
                    });
                }
                Some(ChannelEvent::Error(err)) => return Err(Error::new_io(err)),
            }
        }
    }

    /// 取得本次尝试使用的连接。请求在此期间被终止时返回 `None`。
    async fn obtain<T>(
        &self,
        fut: &RequestFuture<T>,
        previous: Option<Connection>,
        key: &PartitionKey,
        proxy: Option<&ProxyServer>,
        tunnel: bool,
        request: &Request,
    ) -> crate::Result<Option<Connection>>
    where
        T: Send + 'static,
    {
        if let Some(conn) = previous {
            if fut.reuse_channel() && conn.is_open() && conn.key() == key {
                trace!("reusing connection {} for {}", conn.id(), key);
                return Ok(Some(conn));
            }
            if fut.reuse_channel() && conn.is_open() {
                self.pool.offer(conn);
            }
        }
        fut.set_reuse_channel(false);

        if let Some(conn) = self.pool.poll(key) {
            debug!("pooled connection {} for {}", conn.id(), key);
            fut.set_state(ChannelState::Pooled);
            let id = conn.id();
            fut.with_handler(|h| {
                if let Some(events) = h.connection_events() {
                    events.on_connection_pooled(id);
                }
            });
            return Ok(Some(conn));
        }

        loop {
            if self.is_closed() {
                return Err(Error::new_closed());
            }
            let mut conn = match self.connect(fut, key, proxy, request).await? {
                Some(conn) => conn,
                None => return Ok(None),
            };
            let proxy = match (tunnel, proxy) {
                (true, Some(proxy)) => proxy,
                _ => return Ok(Some(conn)),
            };
            match self.tunnel(fut, &mut conn, key, proxy).await? {
                Tunnel::Established => return Ok(Some(conn)),
                Tunnel::Terminated => return Ok(None),
                // 代理应答质询后关闭了连接，带着凭据重新连接
                Tunnel::Reconnect => {}
            }
        }
    }

    /// 新建一条连接。请求在此期间被终止时返回 `None`。
    async fn connect<T>(
        &self,
        fut: &RequestFuture<T>,
        key: &PartitionKey,
        proxy: Option<&ProxyServer>,
        request: &Request,
    ) -> crate::Result<Option<Connection>>
    where
        T: Send + 'static,
    {
        let permit = self.pool.acquire(key)?;
        let target = match proxy {
            Some(proxy) => ConnectTarget {
                host: proxy.host().to_owned(),
                port: proxy.port(),
                secure: proxy.is_secured(),
                local_addr: request.local_address(),
            },
            None => ConnectTarget {
                host: key.host().to_owned(),
                port: key.port(),
                secure: key.is_secure(),
                local_addr: request.local_address(),
            },
        };
        fut.with_handler(|h| {
            if let Some(events) = h.connection_events() {
                events.on_connection_open(&target);
            }
        });
        debug!("connecting to {} for {}", target, key);

        let connect = self.transport.connect(target.clone());
        let connected = match self.config.connect_timeout {
            Some(dur) => {
                let sleep = self.time.sleep(dur);
                match until_terminated(fut, future::select(connect, sleep)).await {
                    Some(Either::Left((res, _))) => res,
                    Some(Either::Right(_)) => {
                        return Err(Error::new_timeout(
                            TimeoutKind::Connect,
                            dur,
                            Some(target.to_string()),
                        ))
                    }
                    None => return Ok(None),
                }
            }
            None => match until_terminated(fut, connect).await {
                Some(res) => res,
                None => return Ok(None),
            },
        };
        let connected = connected.map_err(Error::new_connect)?;
        let conn = Connection::new(connected, permit, self.time.now());
        if fut.channel_state() != ChannelState::Reconnected {
            fut.set_state(ChannelState::New);
        }
        Ok(Some(conn))
    }

    /// 经由代理建立到 https 目标的隧道，然后开始 TLS 握手。
    ///
    /// 代理以 `407` 质询时，用代理凭据应答并重发 `CONNECT`；
    /// 代理随后关闭连接则返回 `Tunnel::Reconnect`。
    async fn tunnel<T>(
        &self,
        fut: &RequestFuture<T>,
        conn: &mut Connection,
        key: &PartitionKey,
        proxy: &ProxyServer,
    ) -> crate::Result<Tunnel>
    where
        T: Send + 'static,
    {
        let authority = format!("{}:{}", key.host(), key.port());
        let target = Uri::try_from(authority.as_str()).map_err(|_| Parse::Uri)?;
        loop {
            let proxy_authorization = self
                .proxy_realm_for(fut, proxy)
                .filter(|realm| fut.proxy_realm().is_some() || realm.is_preemptive())
                .and_then(|realm| realm.authorization(&Method::CONNECT, &target));
            let head = wire::encode_connect(
                key.host(),
                key.port(),
                self.config.user_agent(),
                proxy_authorization.as_ref(),
            );
            if !self.write(fut, conn, head, Error::new_io).await? {
                return Ok(Tunnel::Terminated);
            }

            let mut status = None;
            let mut headers = HeaderMap::new();
            loop {
                match until_terminated(fut, conn.events_mut().recv()).await {
                    None => return Ok(Tunnel::Terminated),
                    Some(Some(ChannelEvent::Status(line))) => status = Some(line),
                    Some(Some(ChannelEvent::Headers(h))) => headers = h,
                    Some(Some(ChannelEvent::BodyPart { last, .. })) => {
                        if last {
                            break;
                        }
                    }
                    Some(Some(ChannelEvent::Error(err))) => return Err(Error::new_io(err)),
                    Some(Some(ChannelEvent::Closed)) | Some(None) => {
                        return Err(Error::new_remotely_closed())
                    }
                }
            }
            let line = status.ok_or_else(Error::new_remotely_closed)?;
            if line.status.is_success() {
                break;
            }
            if line.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                if let Some(realm) = self.proxy_realm_for(fut, proxy) {
                    if proxy_authorization.is_some() || fut.is_in_proxy_auth() {
                        return Err(Error::new_auth_failed(line.status));
                    }
                    if let Some(negotiated) =
                        realm.with_challenge(headers.get_all(PROXY_AUTHENTICATE))
                    {
                        debug!(
                            "answering proxy {:?} challenge for tunnel to {}",
                            negotiated.scheme(),
                            key
                        );
                        fut.set_proxy_realm(Some(negotiated));
                        fut.set_in_proxy_auth(true);
                        let keep_alive =
                            crate::headers::response_keep_alive(line.version, &headers);
                        if keep_alive && conn.is_open() {
                            continue;
                        }
                        return Ok(Tunnel::Reconnect);
                    }
                }
            }
            return Err(Error::new_connect(format!(
                "proxy tunnel to {} refused: {}",
                authority, line.status
            )));
        }
        fut.set_in_proxy_auth(false);

        debug!("tunnel to {} established, starting tls", key);
        match until_terminated(fut, conn.channel().start_tls(key.host())).await {
            Some(res) => {
                res.map_err(Error::new_connect)?;
                Ok(Tunnel::Established)
            }
            None => Ok(Tunnel::Terminated),
        }
    }

    async fn write<T>(
        &self,
        fut: &RequestFuture<T>,
        conn: &Connection,
        buf: Bytes,
        on_err: fn(io::Error) -> Error,
    ) -> crate::Result<bool>
    where
        T: Send + 'static,
    {
        match until_terminated(fut, conn.channel().write(buf)).await {
            Some(Ok(())) => {
                fut.touch();
                Ok(true)
            }
            Some(Err(err)) => Err(on_err(err)),
            None => Ok(false),
        }
    }

    /// 写出请求 body。`Suspend` 时等待 body 唤醒，不占用其他资源。
    async fn write_body<T>(
        &self,
        fut: &RequestFuture<T>,
        conn: &Connection,
        body: &mut dyn Body,
        chunked: bool,
    ) -> crate::Result<bool>
    where
        T: Send + 'static,
    {
        let mut buf = ChunkBuf::with_limit(self.config.body_chunk_size);
        loop {
            let state = body.transfer_to(&mut buf).map_err(Error::new_body)?;
            if !buf.is_empty() {
                let chunk = buf.split();
                let data = if chunked {
                    wire::encode_chunk(&chunk)
                } else {
                    chunk
                };
                fut.mark_body_started();
                if !self.write(fut, conn, data, Error::new_body_write).await? {
                    return Ok(false);
                }
            }
            match state {
                BodyState::Continue => {}
                BodyState::Suspend => {
                    trace!("request body suspended");
                    if until_terminated(fut, poll_fn(|cx| body.poll_resume(cx)))
                        .await
                        .is_none()
                    {
                        return Ok(false);
                    }
                }
                BodyState::Stop => break,
            }
        }
        if chunked {
            let last = Bytes::from_static(wire::LAST_CHUNK);
            if !self.write(fut, conn, last, Error::new_body_write).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 重定向或认证之后，读完当前响应以便复用连接。
    async fn finish_exchange<T>(
        &self,
        fut: &RequestFuture<T>,
        mut conn: Connection,
        reusable: &mut Option<Connection>,
        keep_alive: bool,
    ) -> crate::Result<Next>
    where
        T: Send + 'static,
    {
        fut.set_reuse_channel(false);
        if !keep_alive {
            return Ok(Next::Again);
        }
        loop {
            match until_terminated(fut, conn.events_mut().recv()).await {
                None => return Ok(Next::Done),
                Some(Some(ChannelEvent::BodyPart { last: true, .. })) => break,
                Some(Some(ChannelEvent::BodyPart { .. })) => fut.touch(),
                // 连接已不可复用，下一次尝试另取连接
                Some(_) => return Ok(Next::Again),
            }
        }
        fut.set_reuse_channel(true);
        *reusable = Some(conn);
        Ok(Next::Again)
    }

    /// 响应完整结束：完成请求，能复用的连接归还连接池。
    fn complete<T>(&self, fut: &RequestFuture<T>, conn: Connection)
    where
        T: Send + 'static,
    {
        let poolable = fut.keep_alive()
            && conn.is_open()
            && !self.is_closed()
            && self.config.allow_pooling(conn.key().is_secure());
        if poolable {
            let id = conn.id();
            fut.with_handler(|h| {
                if let Some(events) = h.connection_events() {
                    events.on_connection_offer(id);
                }
            });
        }
        if fut.done() && poolable {
            let id = conn.id();
            if self.pool.offer(conn) {
                trace!("connection {} returned to pool", id);
            }
        }
    }

    fn realm_for<T>(&self, fut: &RequestFuture<T>, request: &Request) -> Option<Realm>
    where
        T: Send + 'static,
    {
        fut.realm()
            .or_else(|| request.realm().or(self.config.realm()).cloned())
    }

    fn proxy_realm_for<T>(&self, fut: &RequestFuture<T>, proxy: &ProxyServer) -> Option<Realm>
    where
        T: Send + 'static,
    {
        fut.proxy_realm().or_else(|| proxy.proxy_realm().cloned())
    }

    /// 协商过的凭据直接使用；否则只有 preemptive 凭据会在质询之前发送。
    fn authorization<T>(
        &self,
        fut: &RequestFuture<T>,
        request: &Request,
        uri: &Uri,
    ) -> Option<HeaderValue>
    where
        T: Send + 'static,
    {
        if let Some(realm) = fut.realm() {
            return realm.authorization(request.method(), uri);
        }
        request
            .realm()
            .or(self.config.realm())
            .filter(|realm| realm.is_preemptive())
            .and_then(|realm| realm.authorization(request.method(), uri))
    }

    fn proxy_authorization<T>(
        &self,
        fut: &RequestFuture<T>,
        proxy: &ProxyServer,
        request: &Request,
        uri: &Uri,
    ) -> Option<HeaderValue>
    where
        T: Send + 'static,
    {
        if let Some(realm) = fut.proxy_realm() {
            return realm.authorization(request.method(), uri);
        }
        proxy
            .proxy_realm()
            .filter(|realm| realm.is_preemptive())
            .and_then(|realm| realm.authorization(request.method(), uri))
    }
}

/// 在状态行之前发生、且说明连接已失效的错误才值得在新连接上重试。
///
/// 建连阶段只重试被对端断开的情况，拒绝连接与域名解析失败直接失败。
fn is_retryable(err: &Error) -> bool {
    if err.is_remotely_closed() {
        return true;
    }
    let kind = match err.io_source() {
        Some(io) => io.kind(),
        None => return false,
    };
    if err.is_connect() {
        return matches!(
            kind,
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        );
    }
    if err.is_io() || err.is_body_write() {
        return matches!(
            kind,
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::NotConnected
        );
    }
    false
}

/// 驱动 `f`，直到它完成或请求被终止（此时返回 `None`）。
async fn until_terminated<T, F>(fut: &RequestFuture<T>, f: F) -> Option<F::Output>
where
    T: Send + 'static,
    F: Future,
{
    let mut f = pin!(f);
    poll_fn(|cx| {
        if fut.poll_terminated(cx).is_ready() {
            return Poll::Ready(None);
        }
        f.as_mut().poll(cx).map(Some)
    })
    .await
}
