//! This module contains [`NodeRpcClient`], the JSON-RPC client for one node.
use std::{
    fmt,
    future::Future,
    io,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use futures::{StreamExt, TryStreamExt};
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, value::RawValue, Value};
use tokio::{io::AsyncBufRead, time};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::{info, warn};

use crate::{
    config::RpcClientConfig,
    constants::JSON_RPC_CONTENT_TYPE,
    endpoint::NodeEndpoint,
    error::{ErrorKind, RpcError, TransportFailure},
    hex_stream::HexStreamDecoder,
    retry::{retry_with, RetryAction, RetryError, Strategy},
    scan::{seek_result_value, ScanError},
    types::{
        ActiveZmqNotification, Block, BlockHeader, BlockWithTxIds, BlockchainInfo, MerkleProof2,
        NetworkInfo, RawTransaction, RpcErrorObject, RpcRequest, RpcResponse,
        SendTransactionsResult, TxSubmission,
    },
};

/// Unparsed remainder of a response body.
pub type ResponseBody = Box<dyn AsyncBufRead + Send + Unpin>;

/// Decoded bytes of a streamed `result` value.
pub type RpcByteStream = HexStreamDecoder<ResponseBody>;

/// Per-call overrides of the client's [`RpcClientConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides [`RpcClientConfig::request_timeout`].
    pub timeout: Option<Duration>,

    /// Overrides [`RpcClientConfig::num_of_retries`].
    pub retries: Option<usize>,
}

impl CallOptions {
    /// Options for calls that must not be repeated.
    pub const fn single_attempt() -> Self {
        Self {
            timeout: None,
            retries: Some(1),
        }
    }

    /// Sets the timeout of each attempt.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the total number of attempts.
    pub const fn with_retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Whether `method` with `params` returns a raw hex blob that must be fetched with
/// [`NodeRpcClient::call_streaming`].
///
/// This holds for `getblock` with verbosity `0`.
pub fn is_streaming_call(method: &str, params: &[Value]) -> bool {
    method == "getblock" && params.get(1).and_then(Value::as_i64) == Some(0)
}

/// Failure of a single attempt.
#[derive(Debug)]
enum AttemptError {
    Transport(TransportFailure),
    Rpc(RpcError),
}

impl AttemptError {
    const fn kind(&self) -> ErrorKind {
        match self {
            AttemptError::Transport(_) => ErrorKind::Transport,
            AttemptError::Rpc(err) => err.kind(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(failure) => failure.fmt(f),
            AttemptError::Rpc(err) => err.fmt(f),
        }
    }
}

impl From<TransportFailure> for AttemptError {
    fn from(failure: TransportFailure) -> Self {
        AttemptError::Transport(failure)
    }
}

impl From<RpcError> for AttemptError {
    fn from(err: RpcError) -> Self {
        AttemptError::Rpc(err)
    }
}

/// JSON-RPC client for one node.
///
/// Clients are cheap to create; they share the HTTP connection pool of the
/// [`crate::RpcClientFactory`] they come from.
#[derive(Debug)]
pub struct NodeRpcClient {
    http: reqwest::Client,
    endpoint: NodeEndpoint,
    url: String,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl NodeRpcClient {
    /// Creates a client for `endpoint` that sends its requests through `http`.
    pub fn new(http: reqwest::Client, endpoint: NodeEndpoint, config: RpcClientConfig) -> Self {
        let url = endpoint.rpc_url();
        Self {
            http,
            endpoint,
            url,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    /// The node this client talks to.
    pub const fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    /// The retry and timeout policy of this client.
    pub const fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Calls `method` and decodes its result as `T`.
    ///
    /// Transport failures are retried up to the configured number of attempts; errors reported by
    /// the node and malformed responses are returned right away. Calls that return a raw blob
    /// (see [`is_streaming_call`]) are rejected, use [`Self::call_streaming`] for those.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError> {
        if is_streaming_call(method, &params) {
            return Err(RpcError::Configuration(format!(
                "{method} with verbosity 0 returns a raw blob and must be streamed"
            )));
        }

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        self.with_retry(method, &params, options, cancel, |request| {
            self.exchange(request, timeout)
        })
        .await
    }

    /// Calls `method` and streams the hex string in its `result` field as decoded bytes.
    ///
    /// The response body is never buffered: it is scanned for the `result` field and the returned
    /// stream starts at the first character of its value. The retry policy applies to
    /// establishing the response.
    pub async fn call_streaming(
        &self,
        method: &str,
        params: Vec<Value>,
        options: CallOptions,
        cancel: &CancellationToken,
    ) -> Result<RpcByteStream, RpcError> {
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let body = self
            .with_retry(method, &params, options, cancel, |request| {
                self.open_stream(request, timeout)
            })
            .await?;

        Ok(HexStreamDecoder::new(body).with_cancel(cancel.clone()))
    }

    async fn with_retry<A, F, Fut>(
        &self,
        method: &str,
        params: &[Value],
        options: CallOptions,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<A, RpcError>
    where
        F: FnMut(RpcRequest) -> Fut,
        Fut: Future<Output = Result<A, AttemptError>>,
    {
        let retries = options.retries.unwrap_or(self.config.num_of_retries);
        let delay = self.config.retry_delay;
        let strategy = Strategy::new(move |err: &AttemptError, _attempts| {
            if err.kind().is_retryable() {
                RetryAction::Retry(delay)
            } else {
                RetryAction::Stop
            }
        })
        .with_max_attempts(retries);

        let result = retry_with(&strategy, cancel, |number| {
            let request = RpcRequest::new(
                self.next_id.fetch_add(1, Ordering::Relaxed),
                method,
                params.to_vec(),
            );
            info!(
                %method,
                params = %request.params_preview(),
                node = %self.endpoint.address(),
                attempt = number,
                "calling node rpc method"
            );

            let pending = attempt(request);
            async move {
                let result = pending.await;
                if let Err(err) = &result {
                    warn!(%method, attempt = number, %err, "rpc attempt failed");
                }
                result
            }
        })
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::Cancelled) => Err(RpcError::Cancelled),
            Err(RetryError::Stopped { attempts, error })
            | Err(RetryError::Exhausted { attempts, error }) => Err(match error {
                AttemptError::Transport(last) => RpcError::Transport {
                    attempts,
                    retries,
                    last,
                    endpoint: self.endpoint.address(),
                },
                AttemptError::Rpc(err) => err,
            }),
        }
    }

    async fn post(&self, request: &RpcRequest) -> Result<reqwest::Response, AttemptError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| RpcError::Configuration(format!("cannot encode request: {e}")))?;

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password))
            .header(CONTENT_TYPE, JSON_RPC_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(TransportFailure::from)?;

        Ok(response)
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        request: RpcRequest,
        timeout: Duration,
    ) -> Result<T, AttemptError> {
        let (status, body) = time::timeout(timeout, async {
            let response = self.post(&request).await?;
            let status = response.status();
            let body = response.bytes().await.map_err(TransportFailure::from)?;
            Ok::<_, AttemptError>((status, body))
        })
        .await
        .map_err(|_| TransportFailure::Timeout(timeout))??;

        if !status.is_success() {
            return Err(self.reject(status, &body));
        }

        let response: RpcResponse<Box<RawValue>> = serde_json::from_slice(&body)
            .map_err(|e| self.protocol(format!("response is not a json-rpc envelope: {e}")))?;
        self.check_id(&request, response.id.as_ref());

        let result = response.into_result().map_err(|e| self.application(e))?;
        let raw = result.as_deref().map_or("null", RawValue::get);

        serde_json::from_str(raw).map_err(|e| {
            self.protocol(format!("unexpected result for {}: {e}", request.method))
                .into()
        })
    }

    async fn open_stream(
        &self,
        request: RpcRequest,
        timeout: Duration,
    ) -> Result<ResponseBody, AttemptError> {
        time::timeout(timeout, async {
            let response = self.post(&request).await?;
            let status = response.status();

            if !status.is_success() {
                let body = response.bytes().await.map_err(TransportFailure::from)?;
                return Err(self.reject(status, &body));
            }

            let chunks = response.bytes_stream().map_err(io::Error::other).boxed();
            let mut body: ResponseBody = Box::new(StreamReader::new(chunks));

            match seek_result_value(&mut body).await {
                Ok(()) => Ok::<_, AttemptError>(body),
                Err(ScanError::Malformed(reason)) => {
                    Err(AttemptError::Rpc(self.protocol(reason.to_string())))
                }
                Err(ScanError::Io(err)) => Err(AttemptError::Transport(TransportFailure::Body(err))),
            }
        })
        .await
        .map_err(|_| TransportFailure::Timeout(timeout))?
    }

    /// Classifies a non-success HTTP response.
    ///
    /// Nodes report RPC errors with a non-success status, so a parseable error body is an
    /// application error. Anything else is a transport failure.
    fn reject(&self, status: StatusCode, body: &[u8]) -> AttemptError {
        match serde_json::from_slice::<RpcResponse<IgnoredAny>>(body) {
            Ok(RpcResponse {
                error: Some(error), ..
            }) => self.application(error).into(),
            _ => TransportFailure::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            }
            .into(),
        }
    }

    fn check_id(&self, request: &RpcRequest, id: Option<&Value>) {
        if id.and_then(Value::as_u64) != Some(request.id) {
            warn!(
                method = %request.method,
                sent = request.id,
                received = ?id,
                "rpc response carries an unexpected id"
            );
        }
    }

    fn application(&self, error: RpcErrorObject) -> RpcError {
        RpcError::Application {
            code: error.code,
            message: error.message,
            endpoint: self.endpoint.address(),
        }
    }

    fn protocol(&self, message: String) -> RpcError {
        RpcError::Protocol {
            message,
            endpoint: self.endpoint.address(),
        }
    }
}

/// Typed wrappers of the node methods the gateway uses.
impl NodeRpcClient {
    /// Height of the active chain tip.
    pub async fn get_block_count(&self, cancel: &CancellationToken) -> Result<u64, RpcError> {
        self.call("getblockcount", vec![], CallOptions::default(), cancel)
            .await
    }

    /// Hash of the active chain tip.
    pub async fn get_best_block_hash(&self, cancel: &CancellationToken) -> Result<String, RpcError> {
        self.call("getbestblockhash", vec![], CallOptions::single_attempt(), cancel)
            .await
    }

    /// Hash of the block at `height` on the active chain.
    pub async fn get_block_hash(
        &self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<String, RpcError> {
        self.call("getblockhash", vec![json!(height)], CallOptions::default(), cancel)
            .await
    }

    /// Decoded header of the block `block_hash`.
    pub async fn get_block_header(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<BlockHeader, RpcError> {
        let params = vec![json!(block_hash), json!(true)];
        self.call("getblockheader", params, CallOptions::default(), cancel)
            .await
    }

    /// Serialized header of the block `block_hash`, hex encoded.
    pub async fn get_block_header_hex(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<String, RpcError> {
        let params = vec![json!(block_hash), json!(false)];
        self.call("getblockheader", params, CallOptions::default(), cancel)
            .await
    }

    /// The block `block_hash` with the ids of its transactions.
    pub async fn get_block_with_tx_ids(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<BlockWithTxIds, RpcError> {
        let params = vec![json!(block_hash), json!(1)];
        self.call("getblock", params, CallOptions::default(), cancel)
            .await
    }

    /// The block `block_hash` with decoded transactions.
    ///
    /// Only verbosity `2` and above is accepted; use [`Self::get_block_as_stream`] for the raw
    /// block and [`Self::get_block_with_tx_ids`] for verbosity `1`.
    pub async fn get_block(
        &self,
        block_hash: &str,
        verbosity: u8,
        cancel: &CancellationToken,
    ) -> Result<Block, RpcError> {
        if verbosity < 2 {
            return Err(RpcError::Configuration(format!(
                "getblock does not accept verbosity {verbosity} here"
            )));
        }

        let params = vec![json!(block_hash), json!(verbosity)];
        self.call("getblock", params, CallOptions::default(), cancel)
            .await
    }

    /// The raw block `block_hash` as a stream of bytes.
    pub async fn get_block_as_stream(
        &self,
        block_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<RpcByteStream, RpcError> {
        let params = vec![json!(block_hash), json!(0)];
        self.call_streaming("getblock", params, CallOptions::default(), cancel)
            .await
    }

    /// The raw block at `height`.
    pub async fn get_block_by_height_as_bytes(
        &self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RpcError> {
        let params = vec![json!(height), json!(0)];
        let hex: String = self
            .call("getblockbyheight", params, CallOptions::default(), cancel)
            .await?;
        self.decode_hex("getblockbyheight", &hex)
    }

    /// The raw transaction `txid`.
    pub async fn get_raw_transaction_as_bytes(
        &self,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RpcError> {
        let params = vec![json!(txid), json!(false)];
        let hex: String = self
            .call("getrawtransaction", params, CallOptions::default(), cancel)
            .await?;
        self.decode_hex("getrawtransaction", &hex)
    }

    /// The transaction `txid` and the block it is mined in, if any.
    pub async fn get_raw_transaction(
        &self,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<RawTransaction, RpcError> {
        let params = vec![json!(txid), json!(true)];
        self.call("getrawtransaction", params, CallOptions::default(), cancel)
            .await
    }

    /// State of the node's chain.
    pub async fn get_blockchain_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BlockchainInfo, RpcError> {
        self.call("getblockchaininfo", vec![], CallOptions::single_attempt(), cancel)
            .await
    }

    /// Network and policy settings of the node.
    pub async fn get_network_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NetworkInfo, RpcError> {
        self.call("getnetworkinfo", vec![], CallOptions::single_attempt(), cancel)
            .await
    }

    /// The ZMQ notifications the node publishes and where.
    pub async fn active_zmq_notifications(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ActiveZmqNotification>, RpcError> {
        self.call(
            "activezmqnotifications",
            vec![],
            CallOptions::single_attempt(),
            cancel,
        )
        .await
    }

    /// Submits a raw transaction and returns its id.
    ///
    /// Never retried: a lost response must not cause a second submission.
    pub async fn send_raw_transaction(
        &self,
        tx: &[u8],
        allow_high_fees: bool,
        dont_check_fees: bool,
        cancel: &CancellationToken,
    ) -> Result<String, RpcError> {
        let params = vec![
            json!(hex::encode(tx)),
            json!(allow_high_fees),
            json!(dont_check_fees),
        ];
        self.call(
            "sendrawtransaction",
            params,
            CallOptions::single_attempt(),
            cancel,
        )
        .await
    }

    /// Submits a batch of raw transactions in one call.
    ///
    /// Never retried, like [`Self::send_raw_transaction`].
    pub async fn send_raw_transactions(
        &self,
        txs: &[TxSubmission],
        cancel: &CancellationToken,
    ) -> Result<SendTransactionsResult, RpcError> {
        let batch = serde_json::to_value(txs)
            .map_err(|e| RpcError::Configuration(format!("cannot encode transactions: {e}")))?;
        self.call(
            "sendrawtransactions",
            vec![batch],
            CallOptions::single_attempt(),
            cancel,
        )
        .await
    }

    /// Merkle proof of `txid` in the block `block_hash`, targeting the block header.
    pub async fn get_merkle_proof2(
        &self,
        block_hash: &str,
        txid: &str,
        cancel: &CancellationToken,
    ) -> Result<MerkleProof2, RpcError> {
        if txid.is_empty() {
            return Err(RpcError::Configuration(
                "getmerkleproof2 needs a transaction id".to_string(),
            ));
        }

        let params = vec![json!(block_hash), json!(txid), json!(false), json!("header")];
        self.call(
            "getmerkleproof2",
            params,
            CallOptions::single_attempt(),
            cancel,
        )
        .await
    }

    fn decode_hex(&self, method: &str, hex: &str) -> Result<Vec<u8>, RpcError> {
        hex::decode(hex).map_err(|e| self.protocol(format!("{method} returned invalid hex: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_raw_getblock_is_streamed() {
        assert!(is_streaming_call("getblock", &[json!("00ab"), json!(0)]));
        assert!(!is_streaming_call("getblock", &[json!("00ab"), json!(1)]));
        assert!(!is_streaming_call("getblock", &[json!("00ab")]));
        assert!(!is_streaming_call("getblockbyheight", &[json!(5), json!(0)]));
    }

    #[test]
    fn single_attempt_options() {
        let options = CallOptions::single_attempt().with_timeout(Duration::from_secs(1));

        assert_eq!(options.retries, Some(1));
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
    }
}
