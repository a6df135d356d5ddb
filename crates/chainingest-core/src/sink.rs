//! Destinations for processed blocks.

use std::io::Write;

use async_trait::async_trait;

use crate::error::ProcessorError;
use crate::ledger::tsv::{encode_currency, encode_event};
use crate::ledger::ExportPolicy;
use crate::processor::ProcessedBlock;

/// Receives each block a driver has processed, in height order.
#[async_trait]
pub trait BlockSink: Send {
    async fn accept(&mut self, block: &ProcessedBlock) -> Result<(), ProcessorError>;
}

/// Keeps every block in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub blocks: Vec<ProcessedBlock>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heights(&self) -> Vec<i64> {
        self.blocks.iter().map(|b| b.block.as_i64()).collect()
    }
}

#[async_trait]
impl BlockSink for MemorySink {
    async fn accept(&mut self, block: &ProcessedBlock) -> Result<(), ProcessorError> {
        self.blocks.push(block.clone());
        Ok(())
    }
}

/// Writes events and currencies as TSV lines, flushing after every block.
pub struct TsvSink<W: Write + Send> {
    policy: ExportPolicy,
    events: W,
    currencies: W,
}

impl<W: Write + Send> TsvSink<W> {
    pub fn new(policy: ExportPolicy, events: W, currencies: W) -> Self {
        Self {
            policy,
            events,
            currencies,
        }
    }

    pub fn into_inner(self) -> (W, W) {
        (self.events, self.currencies)
    }

    fn write_block(&mut self, block: &ProcessedBlock) -> std::io::Result<()> {
        for event in &block.events {
            writeln!(self.events, "{}", encode_event(event, &self.policy))?;
        }
        for currency in &block.currencies {
            writeln!(self.currencies, "{}", encode_currency(currency, &self.policy))?;
        }
        self.events.flush()?;
        self.currencies.flush()
    }
}

#[async_trait]
impl<W: Write + Send> BlockSink for TsvSink<W> {
    async fn accept(&mut self, block: &ProcessedBlock) -> Result<(), ProcessorError> {
        self.write_block(block)
            .map_err(|e| ProcessorError::Sink(format!("block {}: {e}", block.block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Currency, CurrencyFormat, EventSink};
    use crate::types::BlockId;
    use chrono::DateTime;

    fn block() -> ProcessedBlock {
        let mut sink = EventSink::new(
            BlockId::Height(9),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        sink.transfer(Some("0x1"), "0xa", "0xb", Some("0xcc"), "25", false);
        ProcessedBlock {
            block: BlockId::Height(9),
            fingerprint: None,
            events: sink.into_events(),
            currencies: vec![Currency::new("0xcc")],
        }
    }

    #[tokio::test]
    async fn tsv_sink_writes_one_line_per_row() {
        let policy = ExportPolicy {
            module: "ethereum-erc-20".into(),
            format: CurrencyFormat::Hex0x,
            static_currency: None,
        };
        let mut sink = TsvSink::new(policy, Vec::new(), Vec::new());
        sink.accept(&block()).await.unwrap();

        let (events, currencies) = sink.into_inner();
        let events = String::from_utf8(events).unwrap();
        let lines: Vec<_> = events.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("9\t0x1\t0\t"));
        assert!(lines[0].contains("ethereum-erc-20/0xcc\t-25\t-1\t1\t"));
        assert_eq!(
            String::from_utf8(currencies.clone()).unwrap(),
            "ethereum-erc-20/0xcc\t\\N\t\\N\t\\N\t\\N\n"
        );

        // the currency table's key is the value in the event table's column
        let event_key = lines[0].split('\t').nth(5);
        let currency_key = std::str::from_utf8(&currencies).unwrap().split('\t').next();
        assert_eq!(event_key, currency_key);
    }

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let mut sink = MemorySink::new();
        sink.accept(&block()).await.unwrap();
        sink.accept(&block()).await.unwrap();
        assert_eq!(sink.heights(), vec![9, 9]);
    }
}
