//! Wire types of the JSON-RPC protocol and the node replies the client decodes.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    /// Name of the remote method.
    pub method: String,

    /// Positional parameters.
    pub params: Vec<Value>,

    /// Correlation id echoed by the node.
    pub id: u64,
}

impl RpcRequest {
    /// Creates a request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }

    /// Short description of the parameters for log lines.
    ///
    /// The first parameter is shown verbatim, followed by `,...` if there are more.
    pub fn params_preview(&self) -> String {
        let mut preview = match self.params.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if self.params.len() > 1 {
            preview.push_str(",...");
        }
        preview
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// JSON-RPC error code.
    pub code: i32,

    /// Human readable message.
    pub message: String,
}

/// One JSON-RPC response.
///
/// Exactly one of `result` and `error` is meaningful: when `error` is present the result is
/// ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcResponse<T> {
    /// The value returned by the method.
    pub result: Option<T>,

    /// The error reported by the node.
    #[serde(default)]
    pub error: Option<RpcErrorObject>,

    /// Correlation id of the request this answers.
    #[serde(default)]
    pub id: Option<Value>,
}

impl<T> RpcResponse<T> {
    /// Returns the error if present, otherwise the result.
    pub fn into_result(self) -> Result<Option<T>, RpcErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// One entry of the `activezmqnotifications` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveZmqNotification {
    /// Notification name, e.g. `pubhashblock`.
    pub notification: String,

    /// Socket address the node publishes it on, e.g. `tcp://127.0.0.1:28332`.
    pub address: String,
}

/// Reply of `getblockchaininfo`. Fields not listed here are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// Network name.
    pub chain: String,

    /// Height of the active chain tip.
    pub blocks: u64,

    /// Number of validated headers.
    pub headers: u64,

    /// Hash of the active chain tip.
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

/// Reply of `getnetworkinfo`, reduced to the consolidation policy the gateway uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Minimum ratio between inputs and outputs of a consolidation transaction.
    #[serde(rename = "minconsolidationfactor", default)]
    pub min_consolidation_factor: u64,

    /// Largest input script of a consolidation transaction.
    #[serde(rename = "maxconsolidationinputscriptsize", default)]
    pub max_consolidation_input_script_size: u64,

    /// Minimum confirmations of the inputs of a consolidation transaction.
    #[serde(rename = "minconsolidationinputmaturity", default)]
    pub min_consolidation_input_maturity: u64,

    /// Whether non-standard inputs are accepted in consolidation transactions.
    #[serde(rename = "acceptnonstdconsolidationinput", default)]
    pub accept_non_std_consolidation_input: bool,
}

/// Reply of the verbose `getblockheader`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block hash.
    pub hash: String,

    /// Confirmations of the block, `-1` if it is not on the active chain.
    pub confirmations: i64,

    /// Height of the block.
    pub height: u64,

    /// Block version.
    pub version: i64,

    /// Merkle root of the block's transactions.
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,

    /// Number of transactions in the block.
    #[serde(rename = "num_tx", default)]
    pub num_tx: u64,

    /// Block time.
    pub time: u64,

    /// Median time of the previous blocks.
    #[serde(rename = "mediantime", default)]
    pub median_time: u64,

    /// Header nonce.
    pub nonce: u64,

    /// Compact target.
    pub bits: String,

    /// Difficulty of the block.
    pub difficulty: f64,

    /// Hash of the previous block, absent for the genesis block.
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,

    /// Hash of the next block, absent for the chain tip.
    #[serde(rename = "nextblockhash", default)]
    pub next_block_hash: Option<String>,
}

/// Reply of `getblock` with verbosity `1`: the header plus the ids of the block's transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockWithTxIds {
    /// Header fields of the block.
    #[serde(flatten)]
    pub header: BlockHeader,

    /// Serialized size of the block.
    #[serde(default)]
    pub size: u64,

    /// Transaction ids in block order.
    pub tx: Vec<String>,
}

/// One transaction of a verbose block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransaction {
    /// Transaction id.
    pub txid: String,

    /// Serialized size.
    #[serde(default)]
    pub size: u64,

    /// Raw transaction, hex encoded.
    #[serde(default)]
    pub hex: Option<String>,
}

/// Reply of `getblock` with verbosity `2` or higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Header fields of the block.
    #[serde(flatten)]
    pub header: BlockHeader,

    /// Serialized size of the block.
    #[serde(default)]
    pub size: u64,

    /// Decoded transactions in block order.
    pub tx: Vec<BlockTransaction>,
}

/// Reply of `getmerkleproof2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof2 {
    /// Index of the transaction in the block.
    pub index: u64,

    /// Transaction id or raw transaction the proof is for.
    #[serde(rename = "txOrId")]
    pub tx_or_id: String,

    /// What `target` contains, e.g. `header`.
    #[serde(rename = "targetType", default)]
    pub target_type: Option<String>,

    /// The proof target.
    pub target: String,

    /// Hashes along the merkle branch.
    pub nodes: Vec<String>,
}

/// Reply of the verbose `getrawtransaction`, reduced to where the transaction is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Transaction id.
    pub txid: String,

    /// Serialized transaction, hex encoded.
    #[serde(default)]
    pub hex: String,

    /// Block the transaction is mined in, absent while it is in the mempool.
    #[serde(default)]
    pub blockhash: Option<String>,

    /// Confirmations of that block.
    #[serde(default)]
    pub confirmations: Option<u64>,

    /// Time of that block.
    #[serde(default)]
    pub blocktime: Option<u64>,
}

/// One transaction of a `sendrawtransactions` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmission {
    /// Serialized transaction.
    #[serde(rename = "hex", with = "hex::serde")]
    pub tx: Vec<u8>,

    /// Accept fees above the node's maximum.
    #[serde(rename = "allowhighfees")]
    pub allow_high_fees: bool,

    /// Skip the node's fee check.
    #[serde(rename = "dontcheckfee")]
    pub dont_check_fee: bool,

    /// Report the unconfirmed ancestors of accepted transactions.
    #[serde(rename = "listunconfirmedancestors")]
    pub list_unconfirmed_ancestors: bool,
}

impl TxSubmission {
    /// Submits `tx` with the node's default fee checks.
    pub const fn new(tx: Vec<u8>) -> Self {
        Self {
            tx,
            allow_high_fees: false,
            dont_check_fee: false,
            list_unconfirmed_ancestors: false,
        }
    }
}

/// Reply of `sendrawtransactions`.
///
/// Transactions that appear in none of the lists were accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTransactionsResult {
    /// Transactions the node already had.
    #[serde(default)]
    pub known: Vec<String>,

    /// Transactions accepted and then evicted from the mempool.
    #[serde(default)]
    pub evicted: Vec<String>,

    /// Rejected transactions.
    #[serde(default)]
    pub invalid: Vec<InvalidTx>,

    /// Accepted transactions with unconfirmed ancestors.
    #[serde(default)]
    pub unconfirmed: Vec<UnconfirmedTx>,
}

/// A transaction rejected by `sendrawtransactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidTx {
    /// Transaction id.
    pub txid: String,

    /// Reject code of the node.
    #[serde(default)]
    pub reject_code: Option<i32>,

    /// Reject reason of the node.
    #[serde(default)]
    pub reject_reason: Option<String>,

    /// Mempool transactions it conflicts with.
    #[serde(rename = "collidedWith", default)]
    pub collided_with: Vec<CollisionTx>,
}

/// A mempool transaction a submitted transaction conflicts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionTx {
    /// Transaction id.
    pub txid: String,

    /// Size in bytes.
    pub size: u64,

    /// Serialized transaction, hex encoded.
    pub hex: String,
}

/// An accepted transaction and its unconfirmed ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedTx {
    /// Transaction id.
    pub txid: String,

    /// Unconfirmed ancestors of the transaction.
    #[serde(default)]
    pub ancestors: Vec<UnconfirmedAncestor>,
}

/// An unconfirmed ancestor and the outputs it spends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedAncestor {
    /// Transaction id.
    pub txid: String,

    /// Outpoints spent by the ancestor.
    #[serde(default)]
    pub vin: Vec<AncestorInput>,
}

/// Outpoint spent by an unconfirmed ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorInput {
    /// Transaction id of the spent output.
    pub txid: String,

    /// Index of the spent output.
    pub vout: u32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preview_shows_first_parameter_only() {
        let single = RpcRequest::new(1, "getblockhash", vec![json!(100)]);
        let many = RpcRequest::new(2, "getblock", vec![json!("00ab"), json!(0)]);
        let none = RpcRequest::new(3, "getblockcount", vec![]);

        assert_eq!(single.params_preview(), "100");
        assert_eq!(many.params_preview(), "00ab,...");
        assert_eq!(none.params_preview(), "");
    }

    #[test]
    fn request_serializes_as_envelope() {
        let request = RpcRequest::new(7, "getblockcount", vec![]);

        assert_eq!(
            serde_json::to_value(&request).expect("must serialize"),
            json!({ "method": "getblockcount", "params": [], "id": 7 })
        );
    }

    #[test]
    fn error_takes_precedence_over_result() {
        let response: RpcResponse<u64> = serde_json::from_str(
            r#"{"result":null,"id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .expect("must deserialize");

        assert_eq!(
            response.into_result(),
            Err(RpcErrorObject {
                code: -32601,
                message: "Method not found".to_string(),
            })
        );
    }

    #[test]
    fn submission_carries_hex() {
        let submission = TxSubmission {
            allow_high_fees: true,
            ..TxSubmission::new(vec![0x01, 0xab])
        };

        assert_eq!(
            serde_json::to_value(&submission).expect("must serialize"),
            json!({
                "hex": "01ab",
                "allowhighfees": true,
                "dontcheckfee": false,
                "listunconfirmedancestors": false,
            })
        );
    }

    #[test]
    fn empty_send_result_means_all_accepted() {
        let result: SendTransactionsResult =
            serde_json::from_value(json!({})).expect("must deserialize");

        assert_eq!(result, SendTransactionsResult::default());
    }

    #[test]
    fn block_with_tx_ids_flattens_header() {
        let block: BlockWithTxIds = serde_json::from_value(json!({
            "hash": "00aa",
            "confirmations": 3,
            "size": 285,
            "height": 10,
            "version": 1,
            "versionHex": "00000001",
            "merkleroot": "bb",
            "num_tx": 1,
            "time": 1_600_000_000u64,
            "mediantime": 1_599_999_000u64,
            "nonce": 2,
            "bits": "207fffff",
            "difficulty": 4.6e-10,
            "chainwork": "00",
            "previousblockhash": "00cc",
            "tx": ["dd"],
        }))
        .expect("must deserialize");

        assert_eq!(block.header.height, 10);
        assert_eq!(block.header.previous_block_hash.as_deref(), Some("00cc"));
        assert_eq!(block.header.next_block_hash, None);
        assert_eq!(block.tx, vec!["dd".to_string()]);
    }
}
