//! The contract between the engine and a chain-specific decoder.
//!
//! The engine owns node selection, dispatching, consensus and validation.
//! A decoder only knows how to talk to one kind of node and how to turn
//! what it returns into ledger events.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::capability::{
    AddressSpecials, BalanceLookup, CurrencySupply, HandleResolver, MultiBalanceLookup,
    TransactionBroadcaster, TransactionSpecials,
};
use crate::config::ModuleConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::{ProcessorError, RequesterError};
use crate::ledger::{Currency, CurrencyFormat, Event, EventSink, PrivacyModel};
use crate::request::{JsonRpcRequest, Request, RpcId};
use crate::selector::Node;
use crate::types::BlockFingerprint;

// ─── ModuleDescriptor ─────────────────────────────────────────────────────────

/// Static facts a decoder declares about the ledger it produces.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Chain family, e.g. `"ethereum"`.
    pub chain: &'static str,
    pub privacy: PrivacyModel,
    pub currency_format: CurrencyFormat,
    /// Default currency id for static single-currency modules.
    pub static_currency: Option<&'static str>,
    /// Whether the decoder implements [`BlockDecoder::process_mempool`].
    pub mempool: bool,
}

// ─── FetchContext ─────────────────────────────────────────────────────────────

/// The node chosen for one operation, plus dispatcher helpers bound to it.
#[derive(Clone)]
pub struct FetchContext {
    dispatcher: RequestDispatcher,
    node: Node,
}

impl FetchContext {
    pub fn new(dispatcher: RequestDispatcher, node: Node) -> Self {
        Self { dispatcher, node }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn url(&self) -> &str {
        &self.node.url
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub async fn single(&self, req: Request) -> Result<Value, RequesterError> {
        self.dispatcher.single(req).await
    }

    /// Sliding-window fan-out at the configured concurrency.
    pub async fn multi(&self, reqs: Vec<Request>) -> Result<Vec<Value>, RequesterError> {
        let limit = self.dispatcher.config().concurrency;
        self.dispatcher.multi(reqs, limit).await
    }

    /// One JSON-RPC call against the selected node, returning `result`.
    pub async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, RequesterError> {
        self.dispatcher
            .single(Request::rpc(self.url(), 1, method, params))
            .await
    }

    /// JSON-RPC calls split into batch bodies of the configured size, sent
    /// with the configured concurrency. Results line up with `reqs`.
    ///
    /// Ids are renumbered by position so responses can be realigned.
    pub async fn batch(&self, mut reqs: Vec<JsonRpcRequest>) -> Result<Vec<Value>, RequesterError> {
        for (i, req) in reqs.iter_mut().enumerate() {
            req.id = RpcId::Number(i as u64);
        }
        let config = self.dispatcher.config();
        let size = config.batch_size.max(1);
        let mut chunks = Vec::with_capacity(reqs.len().div_ceil(size));
        let mut reqs = reqs.into_iter().peekable();
        while reqs.peek().is_some() {
            chunks.push(reqs.by_ref().take(size).collect::<Vec<_>>());
        }

        let url = self.url();
        let parts: Vec<Vec<Value>> = stream::iter(chunks)
            .map(|chunk| self.dispatcher.batch(url, chunk))
            .buffered(config.concurrency.max(1))
            .try_collect()
            .await?;
        Ok(parts.into_iter().flatten().collect())
    }
}

// ─── DecodedBlock ─────────────────────────────────────────────────────────────

/// A decoder's output for one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBlock {
    pub events: Vec<Event>,
    /// Definitions of currencies first seen in this block (multi-currency modules).
    pub currencies: Vec<Currency>,
}

impl DecodedBlock {
    pub fn new(events: EventSink) -> Self {
        Self {
            events: events.into_events(),
            currencies: Vec::new(),
        }
    }

    pub fn with_currencies(mut self, currencies: Vec<Currency>) -> Self {
        self.currencies = currencies;
        self
    }
}

// ─── BlockDecoder ─────────────────────────────────────────────────────────────

/// Chain-specific half of a module.
///
/// The init hooks run once, in order, from
/// [`BlockProcessor::initialize`](crate::processor::BlockProcessor::initialize).
/// Everything after that takes `&self`: decoding a block must not depend on
/// state left behind by a previous block.
#[async_trait]
pub trait BlockDecoder: Send + Sync + 'static {
    fn descriptor(&self) -> ModuleDescriptor;

    async fn pre_initialize(&mut self, _config: &ModuleConfig) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn initialize(&mut self, _config: &ModuleConfig) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn post_initialize(&mut self, _config: &ModuleConfig) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn post_post_initialize(&mut self, _config: &ModuleConfig) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Height of the node's current tip.
    async fn inquire_latest_block(&self, ctx: &FetchContext) -> Result<u64, ProcessorError>;

    /// Canonical identifying fields of `height`, compared across nodes.
    async fn fetch_fingerprint(
        &self,
        ctx: &FetchContext,
        height: u64,
    ) -> Result<BlockFingerprint, ProcessorError>;

    async fn pre_process_block(&self, _ctx: &FetchContext, _height: u64) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Decode `height`. `fingerprint` is the agreed-upon identity of the block.
    async fn process_block(
        &self,
        ctx: &FetchContext,
        height: u64,
        fingerprint: &BlockFingerprint,
    ) -> Result<DecodedBlock, ProcessorError>;

    /// Decode the unconfirmed pool; events carry the mempool block id.
    async fn process_mempool(&self, _ctx: &FetchContext) -> Result<DecodedBlock, ProcessorError> {
        Err(ProcessorError::Unsupported {
            capability: "mempool".into(),
        })
    }

    fn balance_lookup(&self) -> Option<&dyn BalanceLookup> {
        None
    }

    fn multi_balance_lookup(&self) -> Option<&dyn MultiBalanceLookup> {
        None
    }

    fn transaction_specials(&self) -> Option<&dyn TransactionSpecials> {
        None
    }

    fn address_specials(&self) -> Option<&dyn AddressSpecials> {
        None
    }

    fn currency_supply(&self) -> Option<&dyn CurrencySupply> {
        None
    }

    fn handle_resolver(&self) -> Option<&dyn HandleResolver> {
        None
    }

    fn transaction_broadcaster(&self) -> Option<&dyn TransactionBroadcaster> {
        None
    }
}
