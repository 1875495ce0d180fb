//! Client Tests
//!
//! End-to-end tests of the async client against the in-process mock server.

#[path = "../common/mock_server.rs"]
mod mock_server;

use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::runtime::Handle;
use atlasmc::{Client, Config, ConnectionState, Expiry, McError, Router, Status};

use mock_server::MockServer;

// =============================================================================
// Helper Functions
// =============================================================================

async fn setup() -> (MockServer, Client) {
    let server = MockServer::start().await;
    let client = Client::connect(server.address()).unwrap();
    (server, client)
}

/// Sends everything to the last server
#[derive(Debug)]
struct LastServer;

impl Router for LastServer {
    fn route(&self, _key: &[u8], servers: usize) -> usize {
        servers - 1
    }
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[tokio::test]
async fn test_set_and_get() {
    let (_server, client) = setup().await;

    client.set("foo", "bar", Expiry::Never).await.unwrap();
    let value = client.get("foo").await.unwrap();

    assert_eq!(value, Some(Bytes::from_static(b"bar")));
}

#[tokio::test]
async fn test_get_miss_is_none() {
    let (_server, client) = setup().await;

    assert_eq!(client.get("nothing-here").await.unwrap(), None);
    assert_eq!(client.get_item("nothing-here").await.unwrap(), None);
}

#[tokio::test]
async fn test_flags_round_trip() {
    let (_server, client) = setup().await;

    client
        .set_with_flags("flagged", vec![1u8, 2, 3], 0xCAFE, 60u32)
        .await
        .unwrap();
    let item = client.get_item("flagged").await.unwrap().unwrap();

    assert_eq!(item.flags, 0xCAFE);
    assert_eq!(&item.value[..], &[1, 2, 3]);
    assert_eq!(item.cas, Some(1));
}

#[tokio::test]
async fn test_set_overwrites() {
    let (_server, client) = setup().await;

    client.set("k", "one", Expiry::Never).await.unwrap();
    client.set("k", "two", Duration::from_secs(30)).await.unwrap();

    assert_eq!(client.get("k").await.unwrap().as_deref(), Some(&b"two"[..]));
}

#[tokio::test]
async fn test_delete() {
    let (server, client) = setup().await;
    client.set("gone", "soon", Expiry::Never).await.unwrap();

    assert!(client.delete("gone").await.unwrap());
    assert!(!client.delete("gone").await.unwrap());
    assert_eq!(server.value(b"gone"), None);
}

// =============================================================================
// Counter Tests
// =============================================================================

#[tokio::test]
async fn test_increment_and_decrement() {
    let (_server, client) = setup().await;

    client.set("test", "123", Expiry::Never).await.unwrap();
    assert_eq!(client.increment("test", 22).await.unwrap(), Some(145));

    client.set("test", "123", Expiry::Never).await.unwrap();
    assert_eq!(client.decrement("test", 22).await.unwrap(), Some(101));
}

#[tokio::test]
async fn test_counter_missing_key_is_none() {
    let (server, client) = setup().await;

    assert_eq!(client.increment("absent", 1).await.unwrap(), None);
    assert_eq!(client.decrement("absent", 1).await.unwrap(), None);
    // The no-create sentinel must keep the server from creating it
    assert_eq!(server.value(b"absent"), None);
}

#[tokio::test]
async fn test_decrement_stops_at_zero() {
    let (_server, client) = setup().await;
    client.set("n", "5", Expiry::Never).await.unwrap();

    assert_eq!(client.decrement("n", 10).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_increment_wraps() {
    let (_server, client) = setup().await;
    client
        .set("n", u64::MAX.to_string(), Expiry::Never)
        .await
        .unwrap();

    assert_eq!(client.increment("n", 2).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_counter_with_initial_creates_key() {
    let (server, client) = setup().await;

    assert_eq!(
        client
            .increment_with_initial("hits", 5, 100, Expiry::Never)
            .await
            .unwrap(),
        100
    );
    assert_eq!(
        client
            .increment_with_initial("hits", 5, 100, Expiry::Never)
            .await
            .unwrap(),
        105
    );
    assert_eq!(
        client
            .decrement_with_initial("hits", 10, 0, Expiry::Never)
            .await
            .unwrap(),
        95
    );
    assert_eq!(server.value(b"hits").as_deref(), Some(&b"95"[..]));
}

#[tokio::test]
async fn test_counter_on_non_numeric_value() {
    let (_server, client) = setup().await;
    client.set("word", "hello", Expiry::Never).await.unwrap();

    let err = client.increment("word", 1).await.unwrap_err();

    assert_eq!(err.server_status(), Some(Status::NonNumericValue));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[tokio::test]
async fn test_invalid_keys_fail_locally() {
    let (server, client) = setup().await;
    let long_key = "k".repeat(251);

    assert!(matches!(
        client.get("").await,
        Err(McError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.set(&long_key, "v", Expiry::Never).await,
        Err(McError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.increment(&long_key, 1).await,
        Err(McError::InvalidArgument(_))
    ));

    assert_eq!(server.requests(), 0);
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_key_at_length_limit_is_accepted() {
    let (_server, client) = setup().await;
    let key = "k".repeat(250);

    client.set(&key, "v", Expiry::Never).await.unwrap();

    assert!(client.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_oversized_value_fails_locally() {
    let server = MockServer::start().await;
    let config = Config::builder()
        .server(server.address())
        .max_value_size(16)
        .build()
        .unwrap();
    let client = Client::with_config(config).unwrap();

    let err = client.set("k", vec![0u8; 17], Expiry::Never).await.unwrap_err();

    assert!(matches!(err, McError::InvalidArgument(_)));
    assert_eq!(server.requests(), 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test]
async fn test_many_concurrent_operations() {
    let (server, client) = setup().await;

    let writes = (0..200).map(|i| {
        let client = client.clone();
        async move {
            client
                .set(format!("key:{}", i), format!("value:{}", i), Expiry::Never)
                .await
        }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    let reads = (0..200).map(|i| {
        let client = client.clone();
        async move { (i, client.get(format!("key:{}", i)).await.unwrap()) }
    });
    for (i, value) in join_all(reads).await {
        assert_eq!(value.unwrap(), Bytes::from(format!("value:{}", i)));
    }

    // Clones share the one connection
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_timeout_surfaces_as_error() {
    let server = MockServer::start().await;
    let config = Config::builder()
        .server(server.address())
        .request_timeout(Some(Duration::from_millis(100)))
        .build()
        .unwrap();
    let client = Client::with_config(config).unwrap();

    let err = client.get("stall:me").await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "operation timeout");
    // Later requests are unaffected
    client.set("ok", "1", Expiry::Never).await.unwrap();
}

// =============================================================================
// Routing Tests
// =============================================================================

#[tokio::test]
async fn test_keys_land_on_routed_server() {
    let servers = [
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
    ];
    let list: Vec<String> = servers.iter().map(|s| s.address()).collect();
    let client = Client::connect(list.join(",")).unwrap();
    assert_eq!(client.server_count(), 3);

    for i in 0..30 {
        let key = format!("user:{}", i);
        client.set(&key, "v", Expiry::Never).await.unwrap();

        let owner = client.server_for_key(&key);
        for (index, server) in servers.iter().enumerate() {
            assert_eq!(server.value(key.as_bytes()).is_some(), index == owner);
        }
    }
}

#[tokio::test]
async fn test_failed_server_does_not_affect_siblings() {
    let live = MockServer::start().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = Config::builder()
        .servers([live.address(), dead])
        .connect_timeout(Duration::from_millis(500))
        .reconnect_backoff(Duration::from_secs(5), Duration::from_secs(10))
        .build()
        .unwrap();
    let client = Client::with_config(config).unwrap();

    let key_on = |index: usize| {
        (0..)
            .map(|i| format!("key:{}", i))
            .find(|key| client.server_for_key(key) == index)
            .unwrap()
    };
    let live_key = key_on(0);
    let dead_key = key_on(1);

    let err = client.get(&dead_key).await.unwrap_err();
    assert!(matches!(err, McError::ConnectionLost { .. }), "{:?}", err);
    // Never rerouted to the live server
    let err = client.get(&dead_key).await.unwrap_err();
    assert!(matches!(err, McError::ConnectionUnavailable { .. }), "{:?}", err);
    assert_eq!(live.requests(), 0);

    client.set(&live_key, "v", Expiry::Never).await.unwrap();
    assert_eq!(client.get(&live_key).await.unwrap().as_deref(), Some(&b"v"[..]));

    let states: Vec<ConnectionState> = client.server_states().into_iter().map(|(_, s)| s).collect();
    assert_eq!(states, vec![ConnectionState::Connected, ConnectionState::Failed]);
}

#[tokio::test]
async fn test_custom_router() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let config = Config::builder()
        .servers([first.address(), second.address()])
        .build()
        .unwrap();
    let client = Client::with_router(config, LastServer).unwrap();

    client.set("a", "1", Expiry::Never).await.unwrap();
    client.set("b", "2", Expiry::Never).await.unwrap();

    assert_eq!(first.requests(), 0);
    assert_eq!(second.requests(), 2);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_server_states_and_stats() {
    let (_server, client) = setup().await;
    assert_eq!(client.server_states()[0].1, ConnectionState::Disconnected);

    client.set("k", "v", Expiry::Never).await.unwrap();

    assert_eq!(client.server_states()[0].1, ConnectionState::Connected);
    let mut watch = client.watch_state(0).unwrap();
    assert_eq!(*watch.borrow_and_update(), ConnectionState::Connected);
    assert!(client.watch_state(1).is_none());

    let (_, stats) = &client.server_stats()[0];
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.responses_matched, 1);
}

#[tokio::test]
async fn test_close_fails_in_flight_and_later_requests() {
    let (_server, client) = setup().await;
    client.set("k", "v", Expiry::Never).await.unwrap();

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.get("stall:1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    assert!(matches!(
        in_flight.await.unwrap(),
        Err(McError::ClientClosed)
    ));
    assert!(client.is_closed());
    assert!(matches!(
        client.get("k").await,
        Err(McError::ClientClosed)
    ));

    // Closing again is harmless
    client.close().await;
}

#[tokio::test]
async fn test_client_on_existing_runtime() {
    let server = MockServer::start().await;
    let config = Config::builder().server(server.address()).build().unwrap();
    let client = Client::on_runtime(config, Handle::current()).unwrap();

    client.set("k", "v", Expiry::Never).await.unwrap();

    assert_eq!(client.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
    client.close().await;
}

#[tokio::test]
async fn test_unreachable_server_reports_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    let client = Client::connect(addr).unwrap();

    let err = client.get("k").await.unwrap_err();

    assert!(err.is_transport(), "{:?}", err);
}
