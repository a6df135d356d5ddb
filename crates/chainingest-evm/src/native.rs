//! Native-currency EVM module: value transfers, fees and withdrawals.
//!
//! Per transaction:
//! - `from -value` / `to +value` (flagged failed when the receipt reverted);
//! - `from -fee`, `miner +tip`, `the-void +burnt`, where
//!   `fee = gasUsed * effectiveGasPrice` and `burnt = gasUsed * baseFeePerGas`.
//!
//! Per withdrawal: `the-void -amount` / `address +amount`.

use std::str::FromStr;

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{json, Value};

use chainingest_core::capability::{
    AddressSpecials, BalanceLookup, HandleResolver, MultiBalanceLookup, TransactionBroadcaster,
    TransactionSpecials,
};
use chainingest_core::ledger::{CurrencyFormat, EventSink, PrivacyModel, THE_VOID};
use chainingest_core::{
    BlockDecoder, BlockFingerprint, BlockId, ConfigError, DecodedBlock, FetchContext,
    JsonRpcRequest, ModuleConfig, ModuleDescriptor, ProcessorError, Request,
};

use crate::codec;
use crate::ens;
use crate::rpc::{self, RawBlock, RawReceipt};

const GWEI: u64 = 1_000_000_000;

/// How receipts for a block's transactions are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceiptMode {
    /// `eth_getTransactionReceipt` per transaction, sent as JSON-RPC batches.
    #[default]
    Batch,
    /// One `eth_getBlockReceipts` call.
    Block,
    /// `eth_getTransactionReceipt` per transaction, as separate requests.
    Multi,
}

impl FromStr for ReceiptMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "block" => Ok(Self::Block),
            "multi" => Ok(Self::Multi),
            _ => Err(ConfigError::InvalidValue {
                key: "receipts".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Decoder for an EVM chain's native currency.
///
/// Settings: `receipts` (`batch` | `block` | `multi`) and `ens_registry`
/// (`none` disables handle resolution).
#[derive(Debug, Clone)]
pub struct EvmModule {
    receipts: ReceiptMode,
    ens_registry: Option<String>,
}

impl Default for EvmModule {
    fn default() -> Self {
        Self {
            receipts: ReceiptMode::default(),
            ens_registry: Some(ens::MAINNET_REGISTRY.to_string()),
        }
    }
}

impl EvmModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipt_mode(&self) -> ReceiptMode {
        self.receipts
    }

    async fn fetch_receipts(&self, ctx: &FetchContext, block: &RawBlock, height: u64) -> Result<Vec<RawReceipt>, ProcessorError> {
        if block.transactions.is_empty() {
            return Ok(vec![]);
        }
        let values = match self.receipts {
            ReceiptMode::Block => {
                let value = ctx
                    .rpc("eth_getBlockReceipts", vec![json!(codec::to_quantity(height))])
                    .await?;
                match value {
                    Value::Array(items) => items,
                    other => return Err(ProcessorError::Decode(format!("block receipts: expected array, got {other}"))),
                }
            }
            ReceiptMode::Batch => {
                let reqs = block
                    .transactions
                    .iter()
                    .enumerate()
                    .map(|(i, tx)| JsonRpcRequest::new(i as u64, "eth_getTransactionReceipt", vec![json!(tx.hash)]))
                    .collect();
                ctx.batch(reqs).await?
            }
            ReceiptMode::Multi => {
                let reqs = block
                    .transactions
                    .iter()
                    .enumerate()
                    .map(|(i, tx)| Request::rpc(ctx.url(), i as u64, "eth_getTransactionReceipt", vec![json!(tx.hash)]))
                    .collect();
                ctx.multi(reqs).await?
            }
        };

        let receipts: Vec<RawReceipt> = values
            .into_iter()
            .map(|v| rpc::parse("receipt", v))
            .collect::<Result<_, _>>()?;

        match_receipts(block, &receipts)?;
        Ok(receipts)
    }
}

/// Receipts must pair one-to-one, in order, with the block's transactions.
fn match_receipts(block: &RawBlock, receipts: &[RawReceipt]) -> Result<(), ProcessorError> {
    if receipts.len() != block.transactions.len() {
        return Err(ProcessorError::Decode(format!(
            "{} receipts for {} transactions",
            receipts.len(),
            block.transactions.len()
        )));
    }
    for (tx, receipt) in block.transactions.iter().zip(receipts) {
        if !tx.hash.eq_ignore_ascii_case(&receipt.transaction_hash) {
            return Err(ProcessorError::Decode(format!(
                "receipt {} does not belong to transaction {}",
                receipt.transaction_hash, tx.hash
            )));
        }
    }
    Ok(())
}

/// Turn a block (and, for mined blocks, its receipts) into events.
pub fn decode_block(id: BlockId, block: &RawBlock, receipts: Option<&[RawReceipt]>) -> Result<DecodedBlock, ProcessorError> {
    if let Some(receipts) = receipts {
        match_receipts(block, receipts)?;
    }
    let timestamp = codec::quantity(&block.header.timestamp)?;
    let time = i64::try_from(timestamp)
        .ok()
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .ok_or_else(|| ProcessorError::Decode(format!("timestamp out of range: {timestamp}")))?;
    let mut sink = EventSink::new(id, time);

    let miner = match &block.header.miner {
        Some(m) => codec::address(m)?,
        None => THE_VOID.to_string(),
    };
    let base_fee = block.header.base_fee_per_gas.as_deref().map(codec::quantity_u256).transpose()?;

    for (i, tx) in block.transactions.iter().enumerate() {
        let receipt = receipts.and_then(|r| r.get(i));
        let hash = Some(tx.hash.as_str());
        let from = codec::address(&tx.from)?;
        let to = match (&tx.to, receipt.and_then(|r| r.contract_address.as_ref())) {
            (Some(to), _) | (None, Some(to)) => Some(codec::address(to)?),
            (None, None) => None,
        };

        let value = codec::quantity_u256(&tx.value)?;
        if let (false, Some(to)) = (value.is_zero(), &to) {
            let failed = receipt.is_some_and(RawReceipt::reverted);
            sink.transfer(hash, &from, to, None, &value.to_string(), failed);
        }

        let Some(receipt) = receipt else {
            continue;
        };
        let gas_used = codec::quantity_u256(&receipt.gas_used)?;
        let price = match (&receipt.effective_gas_price, &tx.gas_price) {
            (Some(p), _) | (None, Some(p)) => codec::quantity_u256(p)?,
            (None, None) => {
                return Err(ProcessorError::Decode(format!("no gas price for {}", tx.hash)));
            }
        };
        let overflow = || ProcessorError::Decode(format!("fee overflow in {}", tx.hash));
        let fee = gas_used.checked_mul(price).ok_or_else(overflow)?;
        let burnt = match base_fee {
            Some(b) => gas_used.checked_mul(b).ok_or_else(overflow)?,
            None => U256::ZERO,
        };
        let tip = fee.checked_sub(burnt).ok_or_else(|| {
            ProcessorError::Decode(format!("burnt fee exceeds paid fee in {}", tx.hash))
        })?;

        if fee.is_zero() {
            continue;
        }
        sink.push(hash, from.as_str(), None, format!("-{fee}"));
        if !tip.is_zero() {
            sink.push(hash, miner.as_str(), None, tip.to_string());
        }
        if !burnt.is_zero() {
            sink.push(hash, THE_VOID, None, burnt.to_string());
        }
    }

    if !id.is_mempool() {
        for w in &block.withdrawals {
            let amount = codec::quantity_u256(&w.amount)?
                .checked_mul(U256::from(GWEI))
                .ok_or_else(|| ProcessorError::Decode("withdrawal overflow".into()))?;
            if amount.is_zero() {
                continue;
            }
            let address = codec::address(&w.address)?;
            sink.push(None, THE_VOID, None, format!("-{amount}"));
            sink.push(None, address, None, amount.to_string());
        }
    }

    Ok(DecodedBlock::new(sink))
}

#[async_trait]
impl BlockDecoder for EvmModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            chain: "ethereum",
            privacy: PrivacyModel::Transparent,
            currency_format: CurrencyFormat::Static,
            static_currency: Some("ethereum"),
            mempool: true,
        }
    }

    async fn pre_initialize(&mut self, config: &ModuleConfig) -> Result<(), ProcessorError> {
        if let Some(mode) = config.setting("receipts") {
            self.receipts = mode.parse()?;
        }
        match config.setting("ens_registry") {
            Some("" | "none") => self.ens_registry = None,
            Some(registry) => {
                let registry = codec::address(registry).map_err(|_| ConfigError::InvalidValue {
                    key: "ens_registry".into(),
                    value: registry.to_string(),
                })?;
                self.ens_registry = Some(registry);
            }
            None => {}
        }
        Ok(())
    }

    async fn post_initialize(&mut self, config: &ModuleConfig) -> Result<(), ProcessorError> {
        tracing::debug!(module = %config.name, receipts = ?self.receipts, ens = self.ens_registry.is_some(), "evm module configured");
        Ok(())
    }

    async fn inquire_latest_block(&self, ctx: &FetchContext) -> Result<u64, ProcessorError> {
        rpc::latest_block(ctx).await
    }

    async fn fetch_fingerprint(&self, ctx: &FetchContext, height: u64) -> Result<BlockFingerprint, ProcessorError> {
        rpc::fingerprint(ctx, height).await
    }

    async fn process_block(
        &self,
        ctx: &FetchContext,
        height: u64,
        fingerprint: &BlockFingerprint,
    ) -> Result<DecodedBlock, ProcessorError> {
        let value = ctx
            .rpc("eth_getBlockByNumber", vec![json!(codec::to_quantity(height)), json!(true)])
            .await?;
        let block: RawBlock = rpc::parse("block", value)?;
        rpc::ensure_same_block(&block.header, fingerprint)?;

        let receipts = self.fetch_receipts(ctx, &block, height).await?;
        decode_block(BlockId::Height(height), &block, Some(&receipts))
    }

    async fn process_mempool(&self, ctx: &FetchContext) -> Result<DecodedBlock, ProcessorError> {
        let value = ctx
            .rpc("eth_getBlockByNumber", vec![json!("pending"), json!(true)])
            .await?;
        let block: RawBlock = rpc::parse("pending block", value)?;
        decode_block(BlockId::Mempool, &block, None)
    }

    fn balance_lookup(&self) -> Option<&dyn BalanceLookup> {
        Some(self)
    }

    fn multi_balance_lookup(&self) -> Option<&dyn MultiBalanceLookup> {
        Some(self)
    }

    fn transaction_specials(&self) -> Option<&dyn TransactionSpecials> {
        Some(self)
    }

    fn address_specials(&self) -> Option<&dyn AddressSpecials> {
        Some(self)
    }

    fn handle_resolver(&self) -> Option<&dyn HandleResolver> {
        self.ens_registry.as_ref().map(|_| self as &dyn HandleResolver)
    }

    fn transaction_broadcaster(&self) -> Option<&dyn TransactionBroadcaster> {
        Some(self)
    }
}

fn native_only(currency: Option<&str>) -> Result<(), ProcessorError> {
    match currency {
        None => Ok(()),
        Some(c) => Err(ProcessorError::Unsupported {
            capability: format!("balances in currency '{c}'"),
        }),
    }
}

#[async_trait]
impl BalanceLookup for EvmModule {
    async fn balance(&self, ctx: &FetchContext, address: &str, currency: Option<&str>) -> Result<String, ProcessorError> {
        native_only(currency)?;
        let value = ctx
            .rpc("eth_getBalance", vec![json!(codec::address(address)?), json!("latest")])
            .await?;
        Ok(codec::quantity_u256(value.as_str().unwrap_or_default())?.to_string())
    }
}

#[async_trait]
impl MultiBalanceLookup for EvmModule {
    async fn balances(&self, ctx: &FetchContext, addresses: &[String], currency: Option<&str>) -> Result<Vec<String>, ProcessorError> {
        native_only(currency)?;
        let mut reqs = Vec::with_capacity(addresses.len());
        for (i, address) in addresses.iter().enumerate() {
            reqs.push(JsonRpcRequest::new(
                i as u64,
                "eth_getBalance",
                vec![json!(codec::address(address)?), json!("latest")],
            ));
        }
        ctx.batch(reqs)
            .await?
            .iter()
            .map(|v| codec::quantity_u256(v.as_str().unwrap_or_default()).map(|b| b.to_string()))
            .collect()
    }
}

#[async_trait]
impl TransactionSpecials for EvmModule {
    async fn transaction_specials(&self, ctx: &FetchContext, transaction: &str) -> Result<Value, ProcessorError> {
        let value = ctx.rpc("eth_getTransactionByHash", vec![json!(transaction)]).await?;
        let tx: crate::rpc::RawTransaction = rpc::parse("transaction", value)?;
        let input = codec::data(if tx.input.is_empty() { "0x" } else { &tx.input })?;
        Ok(json!({
            "nonce": tx.nonce.as_deref().map(codec::quantity).transpose()?,
            "gas_limit": tx.gas.as_deref().map(codec::quantity).transpose()?,
            "type": tx.kind.as_deref().map(codec::quantity).transpose()?,
            "contract_creation": tx.to.is_none(),
            "input_bytes": input.len(),
            "selector": (input.len() >= 4).then(|| format!("0x{}", hex::encode(&input[..4]))),
        }))
    }
}

#[async_trait]
impl AddressSpecials for EvmModule {
    async fn address_specials(&self, ctx: &FetchContext, address: &str) -> Result<Value, ProcessorError> {
        let address = codec::address(address)?;
        let results = ctx
            .batch(vec![
                JsonRpcRequest::new(0, "eth_getCode", vec![json!(address), json!("latest")]),
                JsonRpcRequest::new(1, "eth_getTransactionCount", vec![json!(address), json!("latest")]),
            ])
            .await?;
        let code = codec::data(results[0].as_str().unwrap_or("0x"))?;
        let nonce = codec::quantity(results[1].as_str().unwrap_or_default())?;
        Ok(json!({
            "contract": !code.is_empty(),
            "code_bytes": code.len(),
            "nonce": nonce,
        }))
    }
}

#[async_trait]
impl HandleResolver for EvmModule {
    async fn resolve_handle(&self, ctx: &FetchContext, handle: &str) -> Result<Option<String>, ProcessorError> {
        match &self.ens_registry {
            Some(registry) => ens::resolve(ctx, registry, handle).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransactionBroadcaster for EvmModule {
    async fn broadcast_transaction(&self, ctx: &FetchContext, raw: &str) -> Result<String, ProcessorError> {
        codec::data(raw)?;
        let value = ctx.rpc("eth_sendRawTransaction", vec![json!(raw)]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProcessorError::Decode(format!("unexpected broadcast result: {value}")))
    }
}
