//! ERC-20 module: one `from -value` / `to +value` pair per
//! `Transfer(address,address,uint256)` log, with the token contract as the
//! currency id.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::json;

use chainingest_core::capability::{BalanceLookup, CurrencySupply};
use chainingest_core::ledger::{Currency, CurrencyFormat, EventSink, PrivacyModel};
use chainingest_core::{
    BlockDecoder, BlockFingerprint, BlockId, ConfigError, DecodedBlock, FetchContext,
    ModuleConfig, ModuleDescriptor, ProcessorError,
};

use crate::codec;
use crate::rpc::{self, RawLog};

pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const TOTAL_SUPPLY: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Settings: `contracts` (comma-separated allow list; empty = every token)
/// and `metadata` (`false` skips name/symbol/decimals lookups).
#[derive(Debug, Clone)]
pub struct Erc20Module {
    contracts: Vec<String>,
    metadata: bool,
}

impl Default for Erc20Module {
    fn default() -> Self {
        Self {
            contracts: Vec::new(),
            metadata: true,
        }
    }
}

impl Erc20Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contracts(&self) -> &[String] {
        &self.contracts
    }

    /// Token metadata as of `height`, so reprocessing a block reports the
    /// same currency rows.
    async fn describe(&self, ctx: &FetchContext, contract: &str, height: u64) -> Result<Currency, ProcessorError> {
        let mut currency = Currency::new(contract);
        if !self.metadata {
            return Ok(currency);
        }
        let tag = codec::to_quantity(height);
        let call = |selector| rpc::eth_call_at(ctx, contract, codec::call_data(selector, &[]), &tag);

        currency.name = call(NAME).await?.and_then(|r| codec::abi_string(&r));
        currency.symbol = call(SYMBOL).await?.and_then(|r| codec::abi_string(&r));
        currency.decimals = match call(DECIMALS).await? {
            Some(r) => {
                let d = codec::word_u256(&r)?;
                (d <= U256::from(255u32)).then(|| d.as_limbs()[0] as u32)
            }
            None => None,
        };
        Ok(currency)
    }
}

/// Events for the transfer logs of one block, plus the token contracts seen
/// in first-appearance order.
pub fn decode_logs(
    id: BlockId,
    timestamp: u64,
    block_hash: &str,
    logs: &[RawLog],
) -> Result<(EventSink, Vec<String>), ProcessorError> {
    let time = i64::try_from(timestamp)
        .ok()
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .ok_or_else(|| ProcessorError::Decode(format!("timestamp out of range: {timestamp}")))?;
    let mut sink = EventSink::new(id, time);
    let mut contracts: Vec<String> = Vec::new();

    for log in logs {
        if log.removed {
            return Err(ProcessorError::Decode("node returned a removed log".into()));
        }
        if let Some(hash) = &log.block_hash {
            if !hash.eq_ignore_ascii_case(block_hash) {
                return Err(ProcessorError::Decode(format!(
                    "log from block {hash} while decoding {block_hash}"
                )));
            }
        }
        // ERC-721 shares the topic but indexes the token id as a fourth topic.
        if log.topics.len() != 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
            continue;
        }
        let data = codec::data(&log.data)?;
        if data.len() != 32 {
            continue;
        }
        let value = codec::word_u256(&data)?;
        if value.is_zero() {
            continue;
        }

        let from = codec::word_address(&codec::data(&log.topics[1])?)?;
        let to = codec::word_address(&codec::data(&log.topics[2])?)?;
        let currency = codec::address(&log.address)?;

        sink.transfer(
            log.transaction_hash.as_deref(),
            &from,
            &to,
            Some(currency.as_str()),
            &value.to_string(),
            false,
        );
        if !contracts.contains(&currency) {
            contracts.push(currency);
        }
    }
    Ok((sink, contracts))
}

#[async_trait]
impl BlockDecoder for Erc20Module {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            chain: "ethereum",
            privacy: PrivacyModel::Transparent,
            currency_format: CurrencyFormat::Hex0x,
            static_currency: None,
            mempool: false,
        }
    }

    async fn pre_initialize(&mut self, config: &ModuleConfig) -> Result<(), ProcessorError> {
        if let Some(list) = config.setting("contracts") {
            self.contracts = list
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| {
                    codec::address(c).map_err(|_| ConfigError::InvalidValue {
                        key: "contracts".into(),
                        value: c.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(flag) = config.setting("metadata") {
            self.metadata = match flag.trim() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "metadata".into(),
                        value: other.to_string(),
                    }
                    .into())
                }
            };
        }
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
        let header = rpc::header(ctx, height).await?;
        rpc::ensure_same_block(&header, fingerprint)?;
        let block_hash = header.hash.clone().unwrap_or_default();

        let mut filter = json!({ "blockHash": block_hash, "topics": [TRANSFER_TOPIC] });
        if !self.contracts.is_empty() {
            filter["address"] = json!(self.contracts);
        }
        let logs: Vec<RawLog> = rpc::parse("logs", ctx.rpc("eth_getLogs", vec![filter]).await?)?;

        let timestamp = codec::quantity(&header.timestamp)?;
        let (sink, contracts) = decode_logs(BlockId::Height(height), timestamp, &block_hash, &logs)?;

        let mut currencies = Vec::with_capacity(contracts.len());
        for contract in &contracts {
            currencies.push(self.describe(ctx, contract, height).await?);
        }
        tracing::debug!(block = height, logs = logs.len(), tokens = currencies.len(), "decoded token transfers");
        Ok(DecodedBlock::new(sink).with_currencies(currencies))
    }

    fn balance_lookup(&self) -> Option<&dyn BalanceLookup> {
        Some(self)
    }

    fn currency_supply(&self) -> Option<&dyn CurrencySupply> {
        Some(self)
    }
}

fn token(currency: Option<&str>) -> Result<String, ProcessorError> {
    let id = currency.ok_or_else(|| ConfigError::InvalidValue {
        key: "currency".into(),
        value: "a token contract is required".into(),
    })?;
    codec::address(id)
}

#[async_trait]
impl BalanceLookup for Erc20Module {
    async fn balance(&self, ctx: &FetchContext, address: &str, currency: Option<&str>) -> Result<String, ProcessorError> {
        let contract = token(currency)?;
        let data = codec::call_data(BALANCE_OF, &[codec::address_word(address)?]);
        let ret = rpc::eth_call(ctx, &contract, data)
            .await?
            .ok_or_else(|| ProcessorError::Decode(format!("{contract} has no balanceOf")))?;
        Ok(codec::word_u256(&ret)?.to_string())
    }
}

#[async_trait]
impl CurrencySupply for Erc20Module {
    async fn currency_supply(&self, ctx: &FetchContext, currency: Option<&str>) -> Result<String, ProcessorError> {
        let contract = token(currency)?;
        let ret = rpc::eth_call(ctx, &contract, codec::call_data(TOTAL_SUPPLY, &[]))
            .await?
            .ok_or_else(|| ProcessorError::Decode(format!("{contract} has no totalSupply")))?;
        Ok(codec::word_u256(&ret)?.to_string())
    }
}
