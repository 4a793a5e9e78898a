//! Calls spread over every registered node.
//!
//! [`MultiClient`] creates one [`NodeRpcClient`] per node of a [`NodeRegistry`] for each call and
//! combines the answers with one of three strategies:
//! - [`MultiClient::first_successful`] asks the nodes one at a time, in random order;
//! - [`MultiClient::all_successful`] asks every node at once and keeps the answers that succeeded;
//! - [`MultiClient::all_agree`] does the same and also checks that the answers are identical.
use std::{
    collections::{btree_map::Entry, BTreeMap},
    future::Future,
    sync::Arc,
};

use bitcoin::{
    hashes::{sha256d, Hash},
    Txid,
};
use futures::future::join_all;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{NodeRpcClient, RpcByteStream},
    constants::REJECT_ALREADY_KNOWN,
    endpoint::NodeRegistry,
    error::{ErrorKind, RpcError},
    factory::RpcClientFactory,
    types::{
        BlockHeader, BlockchainInfo, InvalidTx, MerkleProof2, NetworkInfo, RawTransaction,
        SendTransactionsResult, TxSubmission, UnconfirmedAncestor, UnconfirmedTx,
    },
};

/// Failure of a call spread over several nodes.
#[derive(Debug, Error)]
pub enum MultiClientError {
    /// The registry has no nodes.
    #[error("no nodes available")]
    NoNodes,

    /// No node answered successfully.
    ///
    /// Carries the error reported by a node when there is one, otherwise the first failure.
    #[error("none of the nodes answered successfully")]
    AllFailed(#[source] RpcError),
}

impl MultiClientError {
    /// The node error behind this failure, if any.
    pub const fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            MultiClientError::NoNodes => None,
            MultiClientError::AllFailed(err) => Some(err),
        }
    }
}

/// Answers of a call made on every node, checked for agreement.
#[derive(Debug)]
pub struct Agreement<T> {
    /// The answer of the first node that succeeded, unless the answers differ.
    pub first_ok: Option<T>,

    /// Whether every successful answer is the same.
    pub all_same: bool,

    /// The error of a failed node, preferring errors reported by the node itself.
    pub first_error: Option<RpcError>,
}

/// Client for every node of a [`NodeRegistry`].
#[derive(Debug, Clone)]
pub struct MultiClient {
    factory: RpcClientFactory,
    nodes: Arc<dyn NodeRegistry>,
}

impl MultiClient {
    /// Creates a client for the nodes currently in `nodes`, looked up anew on every call.
    pub fn new(factory: RpcClientFactory, nodes: Arc<dyn NodeRegistry>) -> Self {
        Self { factory, nodes }
    }

    /// One client per registered node.
    pub fn clients(&self) -> Result<Vec<NodeRpcClient>, MultiClientError> {
        let clients: Vec<_> = self
            .nodes
            .nodes()
            .into_iter()
            .map(|node| self.factory.create(node))
            .collect();

        if clients.is_empty() {
            return Err(MultiClientError::NoNodes);
        }
        Ok(clients)
    }

    /// Makes `call` on one node after the other, in random order, until one succeeds.
    ///
    /// Fails with the last error when every node failed. Cancellation stops the search.
    pub async fn first_successful<T, F, Fut>(&self, call: F) -> Result<T, MultiClientError>
    where
        F: Fn(NodeRpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut clients = self.clients()?;
        clients.shuffle(&mut rand::thread_rng());

        let mut last_error = None;
        for client in clients {
            let node = client.endpoint().id.clone();
            match call(client).await {
                Ok(result) => return Ok(result),
                Err(RpcError::Cancelled) => {
                    return Err(MultiClientError::AllFailed(RpcError::Cancelled))
                }
                Err(err) => {
                    warn!(%node, %err, "node call failed, trying the next node");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.map_or(MultiClientError::NoNodes, MultiClientError::AllFailed))
    }

    /// Makes `call` on every node concurrently and returns every outcome, in registry order.
    pub async fn all<T, F, Fut>(&self, call: F) -> Result<Vec<Result<T, RpcError>>, MultiClientError>
    where
        F: Fn(NodeRpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let clients = self.clients()?;
        Ok(join_all(clients.into_iter().map(call)).await)
    }

    /// Makes `call` on every node concurrently and returns the successful answers.
    ///
    /// Fails only when no node succeeded.
    pub async fn all_successful<T, F, Fut>(&self, call: F) -> Result<Vec<T>, MultiClientError>
    where
        F: Fn(NodeRpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let (successes, first_error) = split(self.all(call).await?);
        match first_error {
            Some(err) if successes.is_empty() => Err(MultiClientError::AllFailed(err)),
            Some(err) => {
                debug!(%err, succeeded = successes.len(), "some nodes failed");
                Ok(successes)
            }
            None => Ok(successes),
        }
    }

    /// Makes `call` on every node concurrently and checks that the successful answers agree.
    ///
    /// When every node failed, an error reported by a node is returned inside the
    /// [`Agreement`]; transport failures on every node fail the call.
    pub async fn all_agree<T, F, Fut>(&self, call: F) -> Result<Agreement<T>, MultiClientError>
    where
        T: PartialEq,
        F: Fn(NodeRpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let (mut successes, first_error) = split(self.all(call).await?);

        if successes.is_empty() {
            return match first_error {
                Some(err) if err.kind() == ErrorKind::Application => Ok(Agreement {
                    first_ok: None,
                    all_same: true,
                    first_error: Some(err),
                }),
                Some(err) => Err(MultiClientError::AllFailed(err)),
                None => Err(MultiClientError::NoNodes),
            };
        }

        let all_same = successes.iter().skip(1).all(|answer| *answer == successes[0]);
        let first_ok = all_same.then(|| successes.swap_remove(0));

        Ok(Agreement {
            first_ok,
            all_same,
            first_error,
        })
    }
}

/// Node methods spread over every node.
impl MultiClient {
    /// Chain state of the node with the highest tip.
    pub async fn get_best_blockchain_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BlockchainInfo, MultiClientError> {
        let infos = self.blockchain_infos(cancel).await?;
        infos
            .into_iter()
            .reduce(|best, info| if info.blocks > best.blocks { info } else { best })
            .ok_or(MultiClientError::NoNodes)
    }

    /// Chain state of the node with the lowest tip.
    pub async fn get_worst_blockchain_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BlockchainInfo, MultiClientError> {
        let infos = self.blockchain_infos(cancel).await?;
        infos
            .into_iter()
            .reduce(|worst, info| if info.blocks < worst.blocks { info } else { worst })
            .ok_or(MultiClientError::NoNodes)
    }

    async fn blockchain_infos(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockchainInfo>, MultiClientError> {
        self.all_successful(|client| async move { client.get_blockchain_info(cancel).await })
            .await
    }

    /// Network settings of any node.
    pub async fn get_any_network_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NetworkInfo, MultiClientError> {
        self.first_successful(|client| async move { client.get_network_info(cancel).await })
            .await
    }

    /// The raw block `block_hash`, streamed from any node that has it.
    pub async fn get_block_as_stream(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<RpcByteStream, MultiClientError> {
        self.first_successful(|client| async move {
            client.get_block_as_stream(block_hash, cancel).await
        })
        .await
    }

    /// Decoded header of the block `block_hash` from any node.
    pub async fn get_block_header(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<BlockHeader, MultiClientError> {
        self.first_successful(|client| async move {
            client.get_block_header(block_hash, cancel).await
        })
        .await
    }

    /// The raw transaction `txid` from any node.
    pub async fn get_raw_transaction_as_bytes(
        &self,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MultiClientError> {
        self.first_successful(|client| async move {
            client.get_raw_transaction_as_bytes(txid, cancel).await
        })
        .await
    }

    /// Merkle proof of `txid` in the block `block_hash` from any node.
    pub async fn get_merkle_proof2(
        &self,
        block_hash: &str,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<MerkleProof2, MultiClientError> {
        self.first_successful(|client| async move {
            client.get_merkle_proof2(block_hash, txid, cancel).await
        })
        .await
    }

    /// Where every node sees the transaction `txid`.
    pub async fn query_transaction(
        &self,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<Agreement<RawTransaction>, MultiClientError> {
        self.all_agree(|client| async move { client.get_raw_transaction(txid, cancel).await })
            .await
    }

    /// Submits `txs` to every node and merges the verdicts.
    ///
    /// Per transaction the most favorable verdict wins, in the order accepted, known, evicted,
    /// invalid. Nodes that fail the call are left out.
    pub async fn send_raw_transactions(
        &self,
        txs: &[TxSubmission],
        cancel: &CancellationToken,
    ) -> Result<SendTransactionsResult, MultiClientError> {
        let submitted: Vec<String> = txs.iter().map(|submission| txid(&submission.tx)).collect();
        let replies = self
            .all_successful(|client| async move { client.send_raw_transactions(txs, cancel).await })
            .await?;

        Ok(merge_send_results(&submitted, replies))
    }
}

/// Successful answers and the most telling error.
fn split<T>(outcomes: Vec<Result<T, RpcError>>) -> (Vec<T>, Option<RpcError>) {
    let mut successes = Vec::with_capacity(outcomes.len());
    let mut first_error: Option<RpcError> = None;

    for outcome in outcomes {
        match outcome {
            Ok(answer) => successes.push(answer),
            Err(err) => {
                let replace = match &first_error {
                    None => true,
                    Some(current) => {
                        current.kind() != ErrorKind::Application
                            && err.kind() == ErrorKind::Application
                    }
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }

    (successes, first_error)
}

fn txid(tx: &[u8]) -> String {
    Txid::from_raw_hash(sha256d::Hash::hash(tx)).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TxOutcome {
    Accepted,
    Known,
    Evicted,
    Invalid,
}

#[derive(Debug)]
struct TxVerdict {
    outcome: TxOutcome,
    rejection: Option<InvalidTx>,
    ancestors: Option<Vec<UnconfirmedAncestor>>,
}

impl TxVerdict {
    const fn new(outcome: TxOutcome) -> Self {
        Self {
            outcome,
            rejection: None,
            ancestors: None,
        }
    }
}

/// The verdict of one node on every transaction it was sent.
///
/// A transaction listed more than once keeps its first listing.
fn categorize(reply: SendTransactionsResult, submitted: &[String]) -> BTreeMap<String, TxVerdict> {
    let mut verdicts = BTreeMap::new();

    for rejection in reply.invalid {
        let outcome = if rejection.reject_code == Some(REJECT_ALREADY_KNOWN) {
            TxOutcome::Known
        } else {
            TxOutcome::Invalid
        };
        verdicts.entry(rejection.txid.clone()).or_insert(TxVerdict {
            outcome,
            rejection: Some(rejection),
            ancestors: None,
        });
    }
    for txid in reply.evicted {
        verdicts
            .entry(txid)
            .or_insert(TxVerdict::new(TxOutcome::Evicted));
    }
    for txid in reply.known {
        verdicts
            .entry(txid)
            .or_insert(TxVerdict::new(TxOutcome::Known));
    }

    let mut ancestors: BTreeMap<_, _> = reply
        .unconfirmed
        .into_iter()
        .map(|unconfirmed| (unconfirmed.txid, unconfirmed.ancestors))
        .collect();
    for txid in submitted {
        if !verdicts.contains_key(txid) {
            verdicts.insert(
                txid.clone(),
                TxVerdict {
                    ancestors: ancestors.remove(txid),
                    ..TxVerdict::new(TxOutcome::Accepted)
                },
            );
        }
    }

    verdicts
}

fn merge_send_results(
    submitted: &[String],
    replies: Vec<SendTransactionsResult>,
) -> SendTransactionsResult {
    let mut merged: BTreeMap<String, TxVerdict> = BTreeMap::new();
    for reply in replies {
        for (txid, verdict) in categorize(reply, submitted) {
            match merged.entry(txid) {
                Entry::Vacant(entry) => {
                    entry.insert(verdict);
                }
                Entry::Occupied(mut entry) => {
                    if verdict.outcome < entry.get().outcome {
                        entry.insert(verdict);
                    }
                }
            }
        }
    }

    let mut result = SendTransactionsResult::default();
    for (txid, verdict) in merged {
        match verdict.outcome {
            TxOutcome::Accepted => {}
            TxOutcome::Known => result.known.push(txid.clone()),
            TxOutcome::Evicted => result.evicted.push(txid.clone()),
            TxOutcome::Invalid => result.invalid.push(verdict.rejection.unwrap_or(InvalidTx {
                txid: txid.clone(),
                reject_code: None,
                reject_reason: None,
                collided_with: Vec::new(),
            })),
        }
        if let Some(ancestors) = verdict.ancestors {
            result.unconfirmed.push(UnconfirmedTx { txid, ancestors });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(txid: &str, code: i32, reason: &str) -> InvalidTx {
        InvalidTx {
            txid: txid.to_string(),
            reject_code: Some(code),
            reject_reason: Some(reason.to_string()),
            collided_with: Vec::new(),
        }
    }

    fn invalid(txid: &str) -> SendTransactionsResult {
        SendTransactionsResult {
            invalid: vec![rejected(txid, 16, "bad-txns")],
            ..Default::default()
        }
    }

    fn known(txid: &str) -> SendTransactionsResult {
        SendTransactionsResult {
            known: vec![txid.to_string()],
            ..Default::default()
        }
    }

    fn evicted(txid: &str) -> SendTransactionsResult {
        SendTransactionsResult {
            evicted: vec![txid.to_string()],
            ..Default::default()
        }
    }

    fn submitted(txids: &[&str]) -> Vec<String> {
        txids.iter().map(|txid| txid.to_string()).collect()
    }

    #[test]
    fn acceptance_by_any_node_wins() {
        let merged = merge_send_results(
            &submitted(&["aa"]),
            vec![invalid("aa"), SendTransactionsResult::default()],
        );

        assert_eq!(merged, SendTransactionsResult::default());
    }

    #[test]
    fn known_wins_over_evicted_and_invalid() {
        let merged = merge_send_results(
            &submitted(&["aa"]),
            vec![evicted("aa"), known("aa"), invalid("aa")],
        );

        assert_eq!(merged, known("aa"));
    }

    #[test]
    fn already_known_rejection_counts_as_known() {
        let already_known = SendTransactionsResult {
            invalid: vec![rejected("aa", REJECT_ALREADY_KNOWN, "txn-already-known")],
            ..Default::default()
        };

        let merged = merge_send_results(&submitted(&["aa"]), vec![already_known, evicted("aa")]);

        assert_eq!(merged, known("aa"));
    }

    #[test]
    fn first_rejection_is_kept() {
        let second = SendTransactionsResult {
            invalid: vec![rejected("aa", 64, "non-mandatory-script-verify-flag")],
            ..Default::default()
        };

        let merged = merge_send_results(&submitted(&["aa"]), vec![invalid("aa"), second]);

        assert_eq!(merged, invalid("aa"));
    }

    #[test]
    fn verdicts_are_kept_per_transaction() {
        let ancestor = UnconfirmedAncestor {
            txid: "ff".to_string(),
            vin: Vec::new(),
        };
        let first = SendTransactionsResult {
            invalid: vec![rejected("bb", 16, "bad-txns")],
            unconfirmed: vec![UnconfirmedTx {
                txid: "aa".to_string(),
                ancestors: vec![ancestor.clone()],
            }],
            ..Default::default()
        };
        let second = SendTransactionsResult {
            invalid: vec![rejected("bb", 16, "bad-txns"), rejected("cc", 16, "bad-txns")],
            ..Default::default()
        };

        let merged = merge_send_results(&submitted(&["aa", "bb", "cc"]), vec![first, second]);

        assert_eq!(
            merged.invalid,
            vec![rejected("bb", 16, "bad-txns")],
            "cc was accepted by the first node"
        );
        assert_eq!(
            merged.unconfirmed,
            vec![UnconfirmedTx {
                txid: "aa".to_string(),
                ancestors: vec![ancestor],
            }]
        );
        assert!(merged.known.is_empty());
        assert!(merged.evicted.is_empty());
    }

    #[test]
    fn node_errors_are_preferred() {
        let outcomes: Vec<Result<u64, RpcError>> = vec![
            Err(RpcError::Configuration("first".to_string())),
            Ok(1),
            Err(RpcError::Application {
                code: -5,
                message: "No such mempool or blockchain transaction".to_string(),
                endpoint: "127.0.0.1:8332".to_string(),
            }),
        ];

        let (successes, first_error) = split(outcomes);

        assert_eq!(successes, vec![1]);
        assert_eq!(first_error.map(|err| err.code()), Some(Some(-5)));
    }

    #[test]
    fn txid_is_displayed_reversed() {
        let coinbase = &bitcoin::constants::genesis_block(bitcoin::Network::Bitcoin).txdata[0];

        assert_eq!(
            txid(&bitcoin::consensus::serialize(coinbase)),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
    }
}
