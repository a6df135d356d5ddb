//! Cross-node block verification.
//!
//! Before a block is decoded, its fingerprint is fetched from one or more
//! distinct nodes. In strict mode every sampled node must answer and all
//! answers must be identical; a single differing field rejects the block.
//! Nothing here retries.

use std::future::Future;

use futures::future::join_all;

use crate::config::ConsensusConfig;
use crate::error::{ConfigError, ProcessorError};
use crate::selector::{Node, NodeSelector};
use crate::types::{BlockFingerprint, BlockId};

/// The node whose view of the block was accepted, and that view.
#[derive(Debug, Clone)]
pub struct Agreement {
    pub node: Node,
    pub fingerprint: BlockFingerprint,
}

pub struct ConsensusChecker<'a> {
    selector: &'a NodeSelector,
    config: &'a ConsensusConfig,
}

impl<'a> ConsensusChecker<'a> {
    pub fn new(selector: &'a NodeSelector, config: &'a ConsensusConfig) -> Self {
        Self { selector, config }
    }

    /// Fetch `height`'s fingerprint with `fetch` and make sure nodes agree on it.
    ///
    /// - consensus disabled: one fetch from one selected node.
    /// - `break_on_first`: nodes are tried in turn; the first success wins and
    ///   the last error is returned if all fail.
    /// - otherwise: `sample_size` distinct nodes are queried concurrently,
    ///   every fetch must succeed and every pair must match.
    pub async fn ensure_block<F, Fut>(&self, height: u64, fetch: F) -> Result<Agreement, ProcessorError>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<BlockFingerprint, ProcessorError>>,
    {
        if !self.config.enabled {
            let node = self.selector.select().clone();
            let fingerprint = fetch(node.clone()).await?;
            return Ok(Agreement { node, fingerprint });
        }

        if self.config.break_on_first {
            return self.first_success(height, fetch).await;
        }

        self.strict(height, fetch).await
    }

    async fn first_success<F, Fut>(&self, height: u64, fetch: F) -> Result<Agreement, ProcessorError>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<BlockFingerprint, ProcessorError>>,
    {
        let mut last_error = None;
        for node in self.selector.select_distinct(self.selector.len()) {
            match fetch(node.clone()).await {
                Ok(fingerprint) => {
                    return Ok(Agreement {
                        node: node.clone(),
                        fingerprint,
                    })
                }
                Err(e) => {
                    tracing::warn!(block = height, node = %node.url, error = %e, "fingerprint fetch failed, trying next node");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ProcessorError::Config(ConfigError::InvalidValue {
                key: "nodes".into(),
                value: "empty pool".into(),
            })
        }))
    }

    async fn strict<F, Fut>(&self, height: u64, fetch: F) -> Result<Agreement, ProcessorError>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<BlockFingerprint, ProcessorError>>,
    {
        let nodes = self.selector.select_distinct(self.config.sample_size);
        if nodes.len() < 2 {
            return Err(ProcessorError::Config(ConfigError::InvalidValue {
                key: "consensus.sample_size".into(),
                value: format!("{} distinct node(s) available, need 2", nodes.len()),
            }));
        }

        let answers = join_all(nodes.iter().map(|n| fetch((*n).clone()))).await;

        let mut views = Vec::with_capacity(answers.len());
        for (node, answer) in nodes.iter().zip(answers) {
            views.push((*node, answer?));
        }

        let (first_node, first) = &views[0];
        for (node, view) in &views[1..] {
            if let Some((field, left, right)) = first.first_difference(view) {
                tracing::error!(
                    block = height,
                    field,
                    left_node = %first_node.url,
                    right_node = %node.url,
                    "nodes disagree on block"
                );
                return Err(ProcessorError::ConsensusMismatch {
                    block: BlockId::Height(height).as_i64(),
                    field: field.to_string(),
                    left_node: first_node.url.clone(),
                    left_value: left.to_string(),
                    right_node: node.url.clone(),
                    right_value: right.to_string(),
                });
            }
        }

        tracing::debug!(block = height, nodes = views.len(), "consensus reached");
        let (node, fingerprint) = views.swap_remove(0);
        Ok(Agreement {
            node: node.clone(),
            fingerprint,
        })
    }
}
