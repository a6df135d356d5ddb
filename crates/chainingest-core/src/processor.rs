//! `BlockProcessor`: drives one module's decoder through its lifecycle and
//! turns a block height into validated ledger output.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ModuleConfig;
use crate::consensus::{Agreement, ConsensusChecker};
use crate::decoder::{BlockDecoder, DecodedBlock, FetchContext, ModuleDescriptor};
use crate::dispatcher::RequestDispatcher;
use crate::error::ProcessorError;
use crate::ledger::{validate_block, Currency, Event, ExportPolicy, LedgerRules};
use crate::selector::{Node, NodeSelector};
use crate::transport::HttpTransport;
use crate::types::{BlockFingerprint, BlockId, MAX_HEIGHT};

/// Lifecycle of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Constructed; `initialize()` not yet called.
    Uninitialized,
    /// Decoder hooks `pre_initialize` and `initialize` have run.
    Initialized,
    /// All hooks have run; blocks may be processed.
    Ready,
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Where a single `process_block` call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    Selecting,
    Fetching,
    ConsensusChecked,
    Decoding,
    Validating,
    Emitted,
    Failed,
}

impl std::fmt::Display for BlockPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selecting => write!(f, "selecting"),
            Self::Fetching => write!(f, "fetching"),
            Self::ConsensusChecked => write!(f, "consensus-checked"),
            Self::Decoding => write!(f, "decoding"),
            Self::Validating => write!(f, "validating"),
            Self::Emitted => write!(f, "emitted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Validated output for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedBlock {
    pub block: BlockId,
    /// Agreed identity of the block; `None` for the mempool.
    pub fingerprint: Option<BlockFingerprint>,
    pub events: Vec<Event>,
    pub currencies: Vec<Currency>,
}

/// One module: configuration, node pool, dispatcher and decoder.
pub struct BlockProcessor<D: BlockDecoder> {
    config: ModuleConfig,
    decoder: D,
    descriptor: ModuleDescriptor,
    dispatcher: RequestDispatcher,
    selector: NodeSelector,
    rules: LedgerRules,
    export: Option<ExportPolicy>,
    state: ProcessorState,
}

impl<D: BlockDecoder> BlockProcessor<D> {
    /// Build a processor. Configuration that does not depend on the decoder
    /// is validated here; the rest is checked by [`Self::initialize`].
    pub fn new(
        config: ModuleConfig,
        decoder: D,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProcessorError> {
        config.validate()?;
        let selector = NodeSelector::new(&config.name, config.nodes.clone(), config.selection)?;
        let dispatcher = RequestDispatcher::new(transport, config.dispatcher.clone());
        let descriptor = decoder.descriptor();
        Ok(Self {
            config,
            decoder,
            descriptor,
            dispatcher,
            selector,
            rules: LedgerRules::default(),
            export: None,
            state: ProcessorState::Uninitialized,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn rules(&self) -> &LedgerRules {
        &self.rules
    }

    /// How this module's events are written to TSV. Available once ready.
    pub fn export_policy(&self) -> Result<&ExportPolicy, ProcessorError> {
        self.ensure_ready()?;
        self.export.as_ref().ok_or_else(|| self.lifecycle("ready"))
    }

    /// Run the four initialization hooks, in order, exactly once.
    pub async fn initialize(&mut self) -> Result<(), ProcessorError> {
        if self.state != ProcessorState::Uninitialized {
            return Err(self.lifecycle("uninitialized"));
        }

        // pre_initialize: the module's declared ledger shape must fit the config.
        let rules = self.config.ledger_rules(&self.descriptor)?;
        let export = self.config.export_policy(&self.descriptor, &rules)?;
        self.decoder.pre_initialize(&self.config).await?;
        self.rules = rules;
        self.export = Some(export);

        self.decoder.initialize(&self.config).await?;
        self.state = ProcessorState::Initialized;

        self.decoder.post_initialize(&self.config).await?;
        self.decoder.post_post_initialize(&self.config).await?;
        self.state = ProcessorState::Ready;

        tracing::info!(
            module = %self.config.name,
            chain = self.descriptor.chain,
            nodes = self.selector.len(),
            policy = %self.selector.policy(),
            "module ready"
        );
        Ok(())
    }

    /// Height of the chain tip according to a freshly selected node.
    pub async fn inquire_latest_block(&self) -> Result<u64, ProcessorError> {
        self.ensure_ready()?;
        let ctx = self.context(self.selector.select().clone());
        let tip = self.decoder.inquire_latest_block(&ctx).await?;
        if tip > MAX_HEIGHT {
            return Err(ProcessorError::Decode(format!(
                "node reported tip {tip}, above the highest processable height"
            )));
        }
        Ok(tip)
    }

    /// Fetch, verify, decode and validate one block.
    ///
    /// Holds no state between calls; processing the same block twice yields
    /// the same output.
    pub async fn process_block(&self, block: BlockId) -> Result<ProcessedBlock, ProcessorError> {
        self.ensure_ready()?;
        let block = block.check()?;
        let result = match block {
            BlockId::Mempool => self.run_mempool().await,
            BlockId::Height(height) => self.run_height(height).await,
        };
        match &result {
            Ok(out) => self.phase(block, BlockPhase::Emitted, out.events.len()),
            Err(e) => tracing::warn!(
                module = %self.config.name,
                block = %block,
                phase = %BlockPhase::Failed,
                class = %e.class(),
                error = %e,
                "block failed"
            ),
        }
        result
    }

    /// Check decoder output against the ledger rules.
    pub fn post_process_block(&self, block: BlockId, decoded: &DecodedBlock) -> Result<(), ProcessorError> {
        validate_block(block, &decoded.events, &decoded.currencies, &self.rules)
    }

    async fn run_height(&self, height: u64) -> Result<ProcessedBlock, ProcessorError> {
        let block = BlockId::Height(height);
        self.phase(block, BlockPhase::Selecting, 0);

        let checker = ConsensusChecker::new(&self.selector, &self.config.consensus);
        self.phase(block, BlockPhase::Fetching, 0);
        let Agreement { node, fingerprint } = checker
            .ensure_block(height, |node| {
                let ctx = self.context(node);
                async move { self.decoder.fetch_fingerprint(&ctx, height).await }
            })
            .await?;
        self.phase(block, BlockPhase::ConsensusChecked, 0);

        let ctx = self.context(node);
        self.decoder.pre_process_block(&ctx, height).await?;
        self.phase(block, BlockPhase::Decoding, 0);
        let decoded = self.decoder.process_block(&ctx, height, &fingerprint).await?;

        self.phase(block, BlockPhase::Validating, decoded.events.len());
        self.post_process_block(block, &decoded)?;

        Ok(ProcessedBlock {
            block,
            fingerprint: Some(fingerprint),
            events: decoded.events,
            currencies: decoded.currencies,
        })
    }

    async fn run_mempool(&self) -> Result<ProcessedBlock, ProcessorError> {
        if !self.descriptor.mempool {
            return Err(ProcessorError::Unsupported {
                capability: "mempool".into(),
            });
        }
        let block = BlockId::Mempool;
        self.phase(block, BlockPhase::Selecting, 0);
        let ctx = self.context(self.selector.select().clone());

        self.phase(block, BlockPhase::Decoding, 0);
        let decoded = self.decoder.process_mempool(&ctx).await?;

        self.phase(block, BlockPhase::Validating, decoded.events.len());
        self.post_process_block(block, &decoded)?;

        Ok(ProcessedBlock {
            block,
            fingerprint: None,
            events: decoded.events,
            currencies: decoded.currencies,
        })
    }

    // ─── capabilities ─────────────────────────────────────────────────────────

    pub async fn balance(&self, address: &str, currency: Option<&str>) -> Result<String, ProcessorError> {
        let cap = self.capability(self.decoder.balance_lookup(), "balance lookup")?;
        cap.balance(&self.fresh_context(), address, currency).await
    }

    /// Balances for many addresses, in input order. Falls back to one lookup
    /// per address when the module has no batched variant.
    pub async fn balances(
        &self,
        addresses: &[String],
        currency: Option<&str>,
    ) -> Result<Vec<String>, ProcessorError> {
        self.ensure_ready()?;
        let ctx = self.fresh_context();
        if let Some(multi) = self.decoder.multi_balance_lookup() {
            return multi.balances(&ctx, addresses, currency).await;
        }
        let single = self.capability(self.decoder.balance_lookup(), "balance lookup")?;
        let mut out = Vec::with_capacity(addresses.len());
        for address in addresses {
            out.push(single.balance(&ctx, address, currency).await?);
        }
        Ok(out)
    }

    pub async fn transaction_specials(&self, transaction: &str) -> Result<Value, ProcessorError> {
        let cap = self.capability(self.decoder.transaction_specials(), "transaction specials")?;
        cap.transaction_specials(&self.fresh_context(), transaction).await
    }

    pub async fn address_specials(&self, address: &str) -> Result<Value, ProcessorError> {
        let cap = self.capability(self.decoder.address_specials(), "address specials")?;
        cap.address_specials(&self.fresh_context(), address).await
    }

    pub async fn currency_supply(&self, currency: Option<&str>) -> Result<String, ProcessorError> {
        let cap = self.capability(self.decoder.currency_supply(), "currency supply")?;
        cap.currency_supply(&self.fresh_context(), currency).await
    }

    pub async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, ProcessorError> {
        let cap = self.capability(self.decoder.handle_resolver(), "handle resolution")?;
        cap.resolve_handle(&self.fresh_context(), handle).await
    }

    pub async fn broadcast_transaction(&self, raw: &str) -> Result<String, ProcessorError> {
        let cap = self.capability(self.decoder.transaction_broadcaster(), "transaction broadcast")?;
        cap.broadcast_transaction(&self.fresh_context(), raw).await
    }

    // ─── helpers ──────────────────────────────────────────────────────────────

    fn capability<'s, T: ?Sized>(&self, cap: Option<&'s T>, name: &str) -> Result<&'s T, ProcessorError> {
        self.ensure_ready()?;
        cap.ok_or_else(|| ProcessorError::Unsupported {
            capability: name.to_string(),
        })
    }

    fn context(&self, node: Node) -> FetchContext {
        FetchContext::new(self.dispatcher.clone(), node)
    }

    fn fresh_context(&self) -> FetchContext {
        self.context(self.selector.select().clone())
    }

    fn ensure_ready(&self) -> Result<(), ProcessorError> {
        if self.state == ProcessorState::Ready {
            Ok(())
        } else {
            Err(self.lifecycle("ready"))
        }
    }

    fn lifecycle(&self, expected: &str) -> ProcessorError {
        ProcessorError::Lifecycle {
            expected: expected.to_string(),
            actual: self.state.to_string(),
        }
    }

    fn phase(&self, block: BlockId, phase: BlockPhase, events: usize) {
        tracing::debug!(module = %self.config.name, block = %block, phase = %phase, events, "block phase");
    }
}
