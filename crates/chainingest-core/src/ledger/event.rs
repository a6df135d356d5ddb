//! The normalized `Event` row and the sink decoders emit into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BlockId;

/// Burned or unaccounted value goes to (or comes from) this address.
pub const THE_VOID: &str = "the-void";
/// Outputs whose script has no standard address form.
pub const NONSTANDARD_SCRIPT: &str = "script-nonstandard";

/// One atomic balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Block height, or `-1` for mempool.
    pub block: i64,
    /// `None` for block-level events such as rewards.
    pub transaction: Option<String>,
    /// Total order within the block, assigned in emission order.
    pub sort_key: u64,
    pub time: DateTime<Utc>,
    pub address: String,
    /// Required for multi-currency modules, absent for single-currency ones.
    pub currency: Option<String>,
    /// Signed decimal delta.
    pub effect: String,
    /// `Some(true)` marks a recorded but unsettled change (e.g. reverted tx).
    pub failed: Option<bool>,
    pub extra: Option<Vec<u8>>,
    pub extra_indexed: Option<Vec<u8>>,
}

impl Event {
    pub fn is_outflow(&self) -> bool {
        self.effect.starts_with('-')
    }

    pub fn is_settled(&self) -> bool {
        self.failed != Some(true)
    }
}

/// Collects events for one block and hands out sort keys in push order.
#[derive(Debug)]
pub struct EventSink {
    block: i64,
    time: DateTime<Utc>,
    events: Vec<Event>,
}

impl EventSink {
    pub fn new(block: BlockId, time: DateTime<Utc>) -> Self {
        Self {
            block: block.as_i64(),
            time,
            events: Vec::new(),
        }
    }

    /// Append an event and return it for optional tagging
    /// (`failed`, `extra`, `extra_indexed`).
    pub fn push(
        &mut self,
        transaction: Option<&str>,
        address: impl Into<String>,
        currency: Option<&str>,
        effect: impl Into<String>,
    ) -> &mut Event {
        let sort_key = self.events.len() as u64;
        self.events.push(Event {
            block: self.block,
            transaction: transaction.map(str::to_string),
            sort_key,
            time: self.time,
            address: address.into(),
            currency: currency.map(str::to_string),
            effect: effect.into(),
            failed: None,
            extra: None,
            extra_indexed: None,
        });
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    /// Emit the `from -amount` / `to +amount` pair for a transfer.
    pub fn transfer(
        &mut self,
        transaction: Option<&str>,
        from: &str,
        to: &str,
        currency: Option<&str>,
        amount: &str,
        failed: bool,
    ) {
        let debit = super::amount::negate(amount);
        let flag = failed.then_some(true);
        self.push(transaction, from, currency, debit).failed = flag;
        self.push(transaction, to, currency, amount).failed = flag;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
