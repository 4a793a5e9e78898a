//! JSON payloads of the `invalidtx` and `removedfrommempool*` notifications.
use serde::{Deserialize, Serialize};

/// A transaction that collided with the one a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollidedTx {
    /// Id of the colliding transaction.
    pub txid: String,

    /// Serialized size in bytes.
    pub size: Option<u64>,

    /// Serialized transaction, hex encoded. Only present for small transactions.
    pub hex: Option<String>,
}

/// Payload of the `invalidtx` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidTxMessage {
    /// Peer that relayed the transaction, if it did not come through RPC.
    pub from_peer_id: Option<i64>,

    /// Id of the rejected transaction.
    pub txid: String,

    /// Serialized size in bytes.
    pub size: Option<u64>,

    /// Serialized transaction, hex encoded.
    pub hex: Option<String>,

    /// The transaction is invalid.
    pub is_invalid: Option<bool>,

    /// Validation failed with an error.
    pub is_validation_error: Option<bool>,

    /// Some inputs are unknown to the node.
    pub is_missing_inputs: Option<bool>,

    /// The transaction double spends an input.
    pub is_double_spend_detected: Option<bool>,

    /// The transaction conflicts with a mempool transaction.
    pub is_mempool_conflict_detected: Option<bool>,

    /// The transaction is not final.
    pub is_non_final: Option<bool>,

    /// Validation ran out of time.
    pub is_validation_timeout_exceeded: Option<bool>,

    /// The transaction is standard.
    pub is_standard_tx: Option<bool>,

    /// Numeric rejection code of the node.
    pub rejection_code: Option<i64>,

    /// Human readable rejection reason.
    pub rejection_reason: Option<String>,

    /// Transactions the rejected one conflicts with.
    pub collided_with: Option<Vec<CollidedTx>>,

    /// When the node rejected the transaction.
    pub rejection_time: Option<String>,
}

/// Payload of the `removedfrommempool` and `removedfrommempoolblock` topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFromMempoolMessage {
    /// Id of the removed transaction.
    pub txid: String,

    /// Why the node removed the transaction, e.g. `collision-in-block-tx`.
    pub reason: String,

    /// Transaction that caused the removal.
    pub collided_with: Option<CollidedTx>,

    /// Block that contained the colliding transaction.
    pub blockhash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_tx_payload_decodes() {
        let payload = r#"{
            "fromPeerId": 3,
            "txid": "aa",
            "size": 191,
            "hex": "0100",
            "isInvalid": true,
            "isDoubleSpendDetected": true,
            "rejectionCode": 258,
            "rejectionReason": "txn-double-spend-detected",
            "collidedWith": [{ "txid": "bb", "size": 191, "hex": "0200" }],
            "rejectionTime": "2024-03-01T10:00:00"
        }"#;

        let message: InvalidTxMessage = serde_json::from_str(payload).expect("must decode");

        assert_eq!(message.txid, "aa");
        assert_eq!(message.from_peer_id, Some(3));
        assert_eq!(message.is_double_spend_detected, Some(true));
        assert_eq!(message.is_non_final, None);
        assert_eq!(message.rejection_code, Some(258));
        assert_eq!(
            message.collided_with.as_deref().map(<[_]>::len),
            Some(1)
        );
    }

    #[test]
    fn only_txid_is_required() {
        let message: InvalidTxMessage =
            serde_json::from_str(r#"{ "txid": "aa" }"#).expect("must decode");
        assert_eq!(message.txid, "aa");

        assert!(serde_json::from_str::<InvalidTxMessage>(r#"{ "size": 1 }"#).is_err());
    }

    #[test]
    fn removed_from_mempool_payload_decodes() {
        let payload = r#"{
            "txid": "aa",
            "reason": "collision-in-block-tx",
            "collidedWith": { "txid": "bb", "size": 10, "hex": "00" },
            "blockhash": "cc"
        }"#;

        let message: RemovedFromMempoolMessage =
            serde_json::from_str(payload).expect("must decode");

        assert_eq!(message.reason, "collision-in-block-tx");
        assert_eq!(
            message.collided_with.map(|tx| tx.txid),
            Some("bb".to_string())
        );
        assert_eq!(message.blockhash.as_deref(), Some("cc"));
    }
}
