//! Topic discovery through a node's JSON-RPC interface.
use std::time::Duration;

use gateway_btc_notify::{TopicDiscovery, ZmqTopic};
use gateway_rpc::{ErrorKind, NodeEndpoint, RpcClientConfig, RpcClientFactory};
use gateway_test_utils::stub_rpc::{StubResponse, StubRpcServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn factory() -> RpcClientFactory {
    RpcClientFactory::new(RpcClientConfig {
        request_timeout: Duration::from_secs(5),
        num_of_retries: 3,
        retry_delay: Duration::from_millis(1),
    })
    .expect("http client must build")
}

#[tokio::test]
async fn discovers_topics_from_active_notifications() {
    let server = StubRpcServer::start().await.expect("stub must start");
    server.respond_to(
        "activezmqnotifications",
        StubResponse::result(json!([
            { "notification": "pubhashblock", "address": "tcp://127.0.0.1:28332" },
            { "notification": "pubinvalidtx", "address": "tcp://127.0.0.1:28332" },
            { "notification": "pubrawtx", "address": "tcp://127.0.0.1:28333" },
        ])),
    );
    let node = NodeEndpoint::new("a", server.host(), server.port(), "user", "pass");

    let topics = factory()
        .discover(&node, &CancellationToken::new())
        .await
        .expect("discovery must succeed");

    let topics: Vec<_> = topics
        .into_iter()
        .map(|discovered| (discovered.topic, discovered.address))
        .collect();
    assert_eq!(
        topics,
        vec![
            (ZmqTopic::HashBlock, "tcp://127.0.0.1:28332".to_string()),
            (ZmqTopic::InvalidTx, "tcp://127.0.0.1:28332".to_string()),
            (
                ZmqTopic::Unknown("rawtx".to_string()),
                "tcp://127.0.0.1:28333".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn discovery_is_attempted_once() {
    let server = StubRpcServer::start().await.expect("stub must start");
    server.respond_always(StubResponse::status(503, ""));
    let node = NodeEndpoint::new("a", server.host(), server.port(), "user", "pass");

    let err = factory()
        .discover(&node, &CancellationToken::new())
        .await
        .expect_err("discovery must fail");

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(server.request_count(), 1);
}
