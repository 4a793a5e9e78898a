//! Tests of calls spread over several stub nodes.
use std::{sync::Arc, time::Duration};

use bitcoin::{
    consensus::{self, encode::serialize_hex},
    constants::genesis_block,
    Network,
};
use gateway_rpc::{
    types::{InvalidTx, TxSubmission},
    ErrorKind, MultiClient, MultiClientError, NodeEndpoint, RpcClientConfig, RpcClientFactory,
};
use gateway_test_utils::stub_rpc::{StubResponse, StubRpcServer};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

async fn start_nodes(count: usize) -> Vec<StubRpcServer> {
    let mut servers = Vec::with_capacity(count);
    for _ in 0..count {
        servers.push(StubRpcServer::start().await.expect("stub must start"));
    }
    servers
}

fn multi_client(servers: &[StubRpcServer]) -> MultiClient {
    let config = RpcClientConfig {
        request_timeout: Duration::from_secs(5),
        num_of_retries: 2,
        retry_delay: Duration::from_millis(1),
    };
    let nodes: Vec<NodeEndpoint> = servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            NodeEndpoint::new(format!("node-{i}"), server.host(), server.port(), "user", "pass")
        })
        .collect();

    let factory = RpcClientFactory::new(config).expect("http client must build");
    MultiClient::new(factory, Arc::new(nodes))
}

fn blockchain_info(blocks: u64) -> StubResponse {
    StubResponse::result(json!({
        "chain": "regtest",
        "blocks": blocks,
        "headers": blocks,
        "bestblockhash": format!("{blocks:064x}"),
    }))
}

fn raw_transaction(txid: &str, blockhash: Option<&str>) -> StubResponse {
    StubResponse::result(json!({
        "txid": txid,
        "hex": "00",
        "blockhash": blockhash,
    }))
}

#[tokio::test]
async fn best_and_worst_tips_are_picked_from_the_healthy_nodes() {
    let servers = start_nodes(3).await;
    servers[0].respond_always(blockchain_info(100));
    servers[1].respond_always(StubResponse::status(503, ""));
    servers[2].respond_always(blockchain_info(102));
    let client = multi_client(&servers);
    let cancel = CancellationToken::new();

    let best = client
        .get_best_blockchain_info(&cancel)
        .await
        .expect("two nodes are healthy");
    let worst = client
        .get_worst_blockchain_info(&cancel)
        .await
        .expect("two nodes are healthy");

    assert_eq!(best.blocks, 102);
    assert_eq!(worst.blocks, 100);
}

#[tokio::test]
async fn first_successful_falls_back_to_another_node() {
    let servers = start_nodes(2).await;
    servers[0].respond_always(StubResponse::rpc_error(500, -28, "Loading block index"));
    servers[1].respond_always(StubResponse::result(json!({ "minconsolidationfactor": 20 })));
    let client = multi_client(&servers);

    let info = client
        .get_any_network_info(&CancellationToken::new())
        .await
        .expect("one node is healthy");

    assert_eq!(info.min_consolidation_factor, 20);
    assert_eq!(servers[1].request_count(), 1);
    assert!(servers[0].request_count() <= 1, "node errors are not retried");
}

#[tokio::test]
async fn block_is_streamed_from_a_node_that_has_it() {
    let block = genesis_block(Network::Regtest);
    let servers = start_nodes(2).await;
    servers[0].respond_always(StubResponse::rpc_error(500, -5, "Block not found"));
    servers[1].respond_always(StubResponse::result(json!(serialize_hex(&block))).chunked(7));
    let client = multi_client(&servers);

    let hash = block.block_hash().to_string();
    let mut stream = client
        .get_block_as_stream(&hash, &CancellationToken::new())
        .await
        .expect("one node has the block");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("stream must decode");

    assert_eq!(raw, consensus::serialize(&block));
}

#[tokio::test]
async fn node_errors_win_over_transport_failures() {
    let servers = start_nodes(2).await;
    servers[0].respond_always(StubResponse::status(503, ""));
    servers[1].respond_always(StubResponse::rpc_error(500, -28, "Loading block index"));
    let client = multi_client(&servers);

    let err = client
        .get_best_blockchain_info(&CancellationToken::new())
        .await
        .expect_err("no node is healthy");

    let rpc_error = err.rpc_error().expect("nodes were asked");
    assert_eq!(rpc_error.kind(), ErrorKind::Application);
    assert_eq!(rpc_error.code(), Some(-28));
}

#[tokio::test]
async fn empty_registry_has_no_nodes() {
    let client = multi_client(&[]);

    let err = client
        .get_any_network_info(&CancellationToken::new())
        .await
        .expect_err("there is nobody to ask");

    assert!(matches!(err, MultiClientError::NoNodes));
}

#[tokio::test]
async fn agreeing_nodes_return_the_transaction() {
    let txid = "11".repeat(32);
    let servers = start_nodes(2).await;
    for server in &servers {
        server.respond_always(raw_transaction(&txid, Some("aa")));
    }
    let client = multi_client(&servers);

    let agreement = client
        .query_transaction(&txid, &CancellationToken::new())
        .await
        .expect("both nodes answer");

    assert!(agreement.all_same);
    assert!(agreement.first_error.is_none());
    let tx = agreement.first_ok.expect("answers agree");
    assert_eq!(tx.blockhash.as_deref(), Some("aa"));
}

#[tokio::test]
async fn disagreeing_nodes_return_no_transaction() {
    let txid = "11".repeat(32);
    let servers = start_nodes(2).await;
    servers[0].respond_always(raw_transaction(&txid, Some("aa")));
    servers[1].respond_always(raw_transaction(&txid, None));
    let client = multi_client(&servers);

    let agreement = client
        .query_transaction(&txid, &CancellationToken::new())
        .await
        .expect("both nodes answer");

    assert!(!agreement.all_same);
    assert!(agreement.first_ok.is_none());
}

#[tokio::test]
async fn unknown_transaction_is_reported_by_the_nodes() {
    let txid = "11".repeat(32);
    let servers = start_nodes(2).await;
    for server in &servers {
        server.respond_always(StubResponse::rpc_error(
            500,
            -5,
            "No such mempool or blockchain transaction",
        ));
    }
    let client = multi_client(&servers);

    let agreement = client
        .query_transaction(&txid, &CancellationToken::new())
        .await
        .expect("node errors are part of the answer");

    assert!(agreement.all_same);
    assert!(agreement.first_ok.is_none());
    assert_eq!(agreement.first_error.and_then(|err| err.code()), Some(-5));
}

#[tokio::test]
async fn unreachable_nodes_fail_the_agreement() {
    let servers = start_nodes(2).await;
    for server in &servers {
        server.respond_always(StubResponse::status(503, ""));
    }
    let client = multi_client(&servers);

    let err = client
        .query_transaction(&"11".repeat(32), &CancellationToken::new())
        .await
        .expect_err("nobody answered");

    assert_eq!(
        err.rpc_error().map(|err| err.kind()),
        Some(ErrorKind::Transport)
    );
}

#[tokio::test]
async fn transactions_are_sent_to_every_node_and_verdicts_merged() {
    let tx = consensus::serialize(&genesis_block(Network::Regtest).txdata[0]);
    let txid = genesis_block(Network::Regtest).txdata[0]
        .compute_txid()
        .to_string();

    let servers = start_nodes(3).await;
    servers[0].respond_always(StubResponse::result(json!({
        "invalid": [{ "txid": txid, "reject_code": 16, "reject_reason": "bad-txns" }],
    })));
    servers[1].respond_always(StubResponse::result(json!({ "evicted": [txid] })));
    servers[2].respond_always(StubResponse::status(503, ""));
    let client = multi_client(&servers);

    let result = client
        .send_raw_transactions(&[TxSubmission::new(tx.clone())], &CancellationToken::new())
        .await
        .expect("two nodes answer");

    assert_eq!(result.evicted, vec![txid.clone()]);
    assert!(result.invalid.is_empty());
    assert!(result.known.is_empty());

    assert_eq!(servers[2].request_count(), 1, "submissions are not retried");
    let request = servers[0].requests()[0].json();
    assert_eq!(request["method"], "sendrawtransactions");
    assert_eq!(request["params"][0][0]["hex"], Value::from(hex::encode(&tx)));
}

#[tokio::test]
async fn transaction_rejected_everywhere_is_invalid() {
    let tx = consensus::serialize(&genesis_block(Network::Regtest).txdata[0]);
    let txid = genesis_block(Network::Regtest).txdata[0]
        .compute_txid()
        .to_string();

    let servers = start_nodes(2).await;
    for server in &servers {
        server.respond_always(StubResponse::result(json!({
            "invalid": [{ "txid": txid, "reject_code": 16, "reject_reason": "bad-txns" }],
        })));
    }
    let client = multi_client(&servers);

    let result = client
        .send_raw_transactions(&[TxSubmission::new(tx)], &CancellationToken::new())
        .await
        .expect("both nodes answer");

    assert_eq!(
        result.invalid,
        vec![InvalidTx {
            txid,
            reject_code: Some(16),
            reject_reason: Some("bad-txns".to_string()),
            collided_with: Vec::new(),
        }]
    );
}
