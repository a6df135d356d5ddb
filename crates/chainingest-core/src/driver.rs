//! Drivers that feed heights to a [`BlockProcessor`] and hand results to a
//! [`BlockSink`].
//!
//! Only drivers retry. A retry always repeats the whole block; a failed
//! block never produces partial output.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decoder::BlockDecoder;
use crate::error::ProcessorError;
use crate::policy::RetryPolicy;
use crate::processor::{BlockProcessor, ProcessedBlock};
use crate::sink::BlockSink;
use crate::types::BlockId;

// ─── RangeDriver ──────────────────────────────────────────────────────────────

/// Outcome of a bounded run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeReport {
    pub processed: u64,
    pub events: usize,
    /// Heights given up on after retryable failures. They produced no output.
    pub skipped: Vec<u64>,
}

/// Processes an inclusive height range once, in order.
pub struct RangeDriver<'a, D: BlockDecoder> {
    processor: &'a BlockProcessor<D>,
    retry: RetryPolicy,
}

impl<'a, D: BlockDecoder> RangeDriver<'a, D> {
    pub fn new(processor: &'a BlockProcessor<D>) -> Self {
        Self {
            processor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Heights whose retryable failures outlast the retry budget are
    /// recorded in [`RangeReport::skipped`] and the run moves on. Any other
    /// error stops the run.
    pub async fn run<S: BlockSink>(
        &self,
        from: u64,
        to: u64,
        sink: &mut S,
    ) -> Result<RangeReport, ProcessorError> {
        let mut report = RangeReport::default();
        tracing::info!(module = self.processor.name(), from, to, "range started");

        for height in from..=to {
            match self.process_with_retry(height).await {
                Ok(block) => {
                    sink.accept(&block).await?;
                    report.processed += 1;
                    report.events += block.events.len();
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        module = self.processor.name(),
                        block = height,
                        error = %e,
                        "skipping block after retries"
                    );
                    report.skipped.push(height);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            module = self.processor.name(),
            processed = report.processed,
            skipped = report.skipped.len(),
            "range complete"
        );
        Ok(report)
    }

    async fn process_with_retry(&self, height: u64) -> Result<ProcessedBlock, ProcessorError> {
        let mut attempt = 0;
        loop {
            match self.processor.process_block(BlockId::Height(height)).await {
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        return Err(e);
                    };
                    tracing::debug!(block = height, attempt, ?delay, "retrying block");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

// ─── Monitor ──────────────────────────────────────────────────────────────────

/// Settings for [`Monitor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// First height to process. `None` starts at the current tip.
    pub start_at: Option<u64>,
    /// Last height to process. `None` runs until an unrecoverable error.
    pub stop_at: Option<u64>,
    /// Sleep when caught up with the tip (milliseconds).
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            start_at: None,
            stop_at: None,
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub processed: u64,
    pub retries: u64,
    /// Next height the monitor would have processed.
    pub next: u64,
}

/// Follows the chain tip. A block that fails with a retryable error is
/// retried, with backoff, until it succeeds; heights are never skipped.
pub struct Monitor<'a, D: BlockDecoder> {
    processor: &'a BlockProcessor<D>,
    retry: RetryPolicy,
    config: MonitorConfig,
}

impl<'a, D: BlockDecoder> Monitor<'a, D> {
    pub fn new(processor: &'a BlockProcessor<D>, config: MonitorConfig) -> Self {
        Self {
            processor,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run<S: BlockSink>(&self, sink: &mut S) -> Result<MonitorReport, ProcessorError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut report = MonitorReport::default();
        let mut attempt: u32 = 0;
        let mut tip: Option<u64> = None;
        let mut next = self.config.start_at;

        loop {
            if let (Some(n), Some(stop)) = (next, self.config.stop_at) {
                if n > stop {
                    report.next = n;
                    tracing::info!(module = self.processor.name(), stop, "monitor reached stop height");
                    return Ok(report);
                }
            }

            if tip.zip(next).map_or(true, |(t, n)| n > t) {
                match self.processor.inquire_latest_block().await {
                    Ok(latest) => {
                        tip = Some(latest);
                        next.get_or_insert(latest);
                    }
                    Err(e) if e.is_retryable() => {
                        attempt += 1;
                        report.retries += 1;
                        self.back_off(attempt, None, &e).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let (Some(t), Some(n)) = (tip, next) else {
                continue;
            };
            if n > t {
                tracing::trace!(module = self.processor.name(), tip = t, "caught up, waiting");
                tokio::time::sleep(poll).await;
                continue;
            }

            match self.processor.process_block(BlockId::Height(n)).await {
                Ok(block) => {
                    sink.accept(&block).await?;
                    report.processed += 1;
                    attempt = 0;
                    next = Some(n + 1);
                    report.next = n + 1;
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    report.retries += 1;
                    self.back_off(attempt, Some(n), &e).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn back_off(&self, attempt: u32, block: Option<u64>, error: &ProcessorError) {
        let delay = self.retry.backoff(attempt);
        tracing::warn!(
            module = self.processor.name(),
            block,
            attempt,
            ?delay,
            error = %error,
            "retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
