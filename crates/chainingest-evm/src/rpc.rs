//! EVM JSON-RPC wire types and the calls shared by every EVM module.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainingest_core::{BlockFingerprint, FetchContext, ProcessorError, RequesterError};

use crate::codec;

/// Header fields of `eth_getBlockByNumber`.
///
/// `hash` and `number` are null for the pending block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeader {
    pub number: Option<String>,
    pub hash: Option<String>,
    pub parent_hash: String,
    pub timestamp: String,
    pub miner: Option<String>,
    pub base_fee_per_gas: Option<String>,
}

/// Block fetched with full transaction objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    #[serde(flatten)]
    pub header: RawHeader,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    #[serde(default)]
    pub withdrawals: Vec<RawWithdrawal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub value: String,
    pub gas_price: Option<String>,
    pub nonce: Option<String>,
    pub gas: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: String,
    /// `0x1` success, `0x0` reverted; absent before Byzantium.
    pub status: Option<String>,
    pub gas_used: String,
    pub effective_gas_price: Option<String>,
    pub contract_address: Option<String>,
}

impl RawReceipt {
    pub fn reverted(&self) -> bool {
        self.status.as_deref() == Some("0x0")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_hash: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// Beacon-chain withdrawal; `amount` is in gwei.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWithdrawal {
    pub address: String,
    pub amount: String,
}

pub fn parse<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, ProcessorError> {
    serde_json::from_value(value).map_err(|e| ProcessorError::Decode(format!("{what}: {e}")))
}

pub async fn latest_block(ctx: &FetchContext) -> Result<u64, ProcessorError> {
    let value = ctx.rpc("eth_blockNumber", vec![]).await?;
    codec::quantity(value.as_str().unwrap_or_default())
}

pub async fn header(ctx: &FetchContext, height: u64) -> Result<RawHeader, ProcessorError> {
    let value = ctx
        .rpc(
            "eth_getBlockByNumber",
            vec![json!(codec::to_quantity(height)), json!(false)],
        )
        .await?;
    parse("block header", value)
}

/// Hash, parent hash and number of `height`; what nodes must agree on.
pub async fn fingerprint(ctx: &FetchContext, height: u64) -> Result<BlockFingerprint, ProcessorError> {
    let header = header(ctx, height).await?;
    Ok(fingerprint_of(&header))
}

pub fn fingerprint_of(block: &RawHeader) -> BlockFingerprint {
    BlockFingerprint::new()
        .with("hash", block.hash.clone().unwrap_or_default())
        .with("parent_hash", block.parent_hash.clone())
        .with("number", block.number.clone().unwrap_or_default())
}

/// Fail if the node's block is not the one consensus agreed on.
pub fn ensure_same_block(block: &RawHeader, agreed: &BlockFingerprint) -> Result<(), ProcessorError> {
    let ours = fingerprint_of(block);
    match agreed.first_difference(&ours) {
        None => Ok(()),
        Some((field, expected, got)) => Err(ProcessorError::Decode(format!(
            "block changed under us: {field} was {expected}, node now serves {got}"
        ))),
    }
}

/// `eth_call` against `latest`. A revert comes back as `Ok(None)`, as does an
/// empty return (no contract at `to`); transport failures propagate.
pub async fn eth_call(ctx: &FetchContext, to: &str, data: String) -> Result<Option<Vec<u8>>, ProcessorError> {
    eth_call_at(ctx, to, data, "latest").await
}

/// `eth_call` against the state at `tag`, a block quantity or a named tag.
pub async fn eth_call_at(
    ctx: &FetchContext,
    to: &str,
    data: String,
    tag: &str,
) -> Result<Option<Vec<u8>>, ProcessorError> {
    match ctx
        .rpc("eth_call", vec![json!({ "to": to, "data": data }), json!(tag)])
        .await
    {
        Ok(value) => {
            let bytes = codec::data(value.as_str().unwrap_or_default())?;
            Ok((!bytes.is_empty()).then_some(bytes))
        }
        Err(RequesterError::Rpc { code, message, .. }) => {
            tracing::debug!(to, ?code, %message, "eth_call reverted");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_ignores_transaction_hashes() {
        let header: RawHeader = parse(
            "header",
            json!({
                "number": "0x10",
                "hash": "0xb16",
                "parentHash": "0xb15",
                "timestamp": "0x6553f100",
                "transactions": ["0xt1", "0xt2"]
            }),
        )
        .unwrap();
        assert_eq!(fingerprint_of(&header).get("parent_hash"), Some("0xb15"));
        assert!(header.miner.is_none());
    }

    #[test]
    fn changed_block_is_detected() {
        let header: RawHeader = parse(
            "header",
            json!({ "number": "0x10", "hash": "0xb16", "parentHash": "0xb15", "timestamp": "0x1" }),
        )
        .unwrap();
        let agreed = fingerprint_of(&header);
        ensure_same_block(&header, &agreed).unwrap();

        let reorged = agreed.clone().with("hash", "0xother");
        let err = ensure_same_block(&header, &reorged).unwrap_err();
        assert!(err.is_retryable());
    }
}
