mod support;

use std::time::Duration;

use courier::client::{Builder, Client, Request};
use courier::rt::tokio::{TokioExecutor, TokioTimer};

use support::{Action, MockTransport, Reply};

fn client(transport: &MockTransport, configure: impl FnOnce(&mut Builder)) -> Client {
    let mut builder = Client::builder(TokioExecutor::new());
    builder.timer(TokioTimer::new());
    configure(&mut builder);
    builder.build(transport.clone())
}

async fn get(client: &Client, uri: &str) -> courier::Result<courier::client::Response> {
    client
        .execute_request(Request::get(uri).build().unwrap())
        .get()
        .await
}

/// 测试：保持连接的响应结束后，连接被下一个同分区请求复用。
#[tokio::test]
async fn keep_alive_reuses_connection() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |_| {});

    get(&client, "http://example.com/1").await.unwrap();
    assert_eq!(client.pool().idle_count(), 1);
    get(&client, "http://example.com/2").await.unwrap();

    assert_eq!(transport.connects(), 1);
    let seen = transport.seen();
    assert_eq!(seen[0].conn, seen[1].conn);
    assert_eq!(client.pool().open_connections(), 1);
}

#[tokio::test]
async fn connection_close_is_not_pooled() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("bye").close().into_action());
    let client = client(&transport, |_| {});

    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(client.pool().idle_count(), 0);
    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn keep_alive_disabled() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |b| {
        b.keep_alive(false);
    });

    get(&client, "http://example.com/").await.unwrap();
    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.seen()[0].headers["connection"], "close");
}

/// 测试：不同 scheme 属于不同分区。
#[tokio::test]
async fn partitions_by_scheme() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |_| {});

    get(&client, "http://example.com/").await.unwrap();
    get(&client, "https://example.com/").await.unwrap();
    assert_eq!(transport.connects(), 2);

    let targets = transport.targets();
    assert!(!targets[0].secure);
    assert_eq!(targets[0].port, 80);
    assert!(targets[1].secure);
    assert_eq!(targets[1].port, 443);

    let per_host = client.pool().idle_count_per_host();
    assert_eq!(per_host.values().sum::<usize>(), 2);
}

#[tokio::test]
async fn ssl_pooling_disabled() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |b| {
        b.allow_pooling_ssl_connections(false);
    });

    get(&client, "https://example.com/").await.unwrap();
    get(&client, "https://example.com/").await.unwrap();
    assert_eq!(transport.connects(), 2);
    assert_eq!(client.pool().idle_count(), 0);
}

/// 测试：每主机连接数上限被占满时，新请求立即失败。
#[tokio::test]
async fn per_host_limit() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|seen| {
        if seen.path == "/slow" {
            Action::Silence
        } else {
            Reply::ok("fast").into_action()
        }
    });
    let client = client(&transport, |b| {
        b.max_connections_per_host(1);
    });

    let slow = client.execute_request(Request::get("http://example.com/slow").build().unwrap());
    while transport.requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = get(&client, "http://example.com/fast").await.unwrap_err();
    assert!(err.is_too_many_connections(), "{:?}", err);

    // 其他主机不受影响
    assert_eq!(get(&client, "http://other.com/fast").await.unwrap().text(), "fast");

    // 取消后许可被归还
    assert!(slow.cancel());
    for _ in 0..100 {
        if client.pool().open_connections() <= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(get(&client, "http://example.com/fast").await.unwrap().text(), "fast");
}

#[tokio::test]
async fn close_destroys_idle_connections() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |_| {});

    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(client.pool().idle_count(), 1);

    client.close();
    assert!(!client.pool().is_open());
    assert_eq!(client.pool().idle_count(), 0);
    assert!(!transport.is_open(0));
}

/// 测试：池中空闲超时的连接被后台任务淘汰。
#[tokio::test]
async fn idle_connections_expire() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::new(|_| Reply::ok("ok").into_action());
    let client = client(&transport, |b| {
        b.pooled_connection_idle_timeout(Duration::from_millis(50))
            .pool_cleaner_period(Duration::from_millis(20));
    });

    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(client.pool().idle_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pool().idle_count(), 0);

    get(&client, "http://example.com/").await.unwrap();
    assert_eq!(transport.connects(), 2);
}
