//! Node selection over a configured endpoint pool.
//!
//! Selection is local and never blocks. The policy is applied on every call,
//! so a retried block naturally lands on a different node.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub url: String,
    /// Relative weight for [`SelectionPolicy::Weighted`].
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Node {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: 1,
        }
    }

    pub fn weighted(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl std::str::FromStr for SelectionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "weighted" => Ok(Self::Weighted),
            _ => Err(ConfigError::InvalidValue {
                key: "selection".into(),
                value: s.to_string(),
            }),
        }
    }
}

impl SelectionPolicy {
    /// `false` for zero-weight nodes under weighted selection.
    pub fn may_pick(&self, node: &Node) -> bool {
        *self != Self::Weighted || node.weight > 0
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Random => write!(f, "random"),
            Self::Weighted => write!(f, "weighted"),
        }
    }
}

/// Chooses a node per call according to a [`SelectionPolicy`].
#[derive(Debug)]
pub struct NodeSelector {
    nodes: Vec<Node>,
    policy: SelectionPolicy,
    cursor: AtomicUsize,
}

impl NodeSelector {
    /// Build a selector. An empty pool is a configuration error.
    pub fn new(
        module: &str,
        nodes: Vec<Node>,
        policy: SelectionPolicy,
    ) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::NoNodes {
                module: module.to_string(),
            });
        }
        if policy == SelectionPolicy::Weighted && nodes.iter().all(|n| n.weight == 0) {
            return Err(ConfigError::Invalid {
                module: module.to_string(),
                reason: "weighted selection needs at least one node with weight > 0".into(),
            });
        }
        Ok(Self {
            nodes,
            policy,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Pick one node.
    pub fn select(&self) -> &Node {
        &self.nodes[self.next_index()]
    }

    /// Up to `n` distinct nodes, starting from a policy-chosen one and
    /// wrapping around the pool. Nodes [`select`](Self::select) would never
    /// return are left out.
    pub fn select_distinct(&self, n: usize) -> Vec<&Node> {
        let start = self.next_index();
        let len = self.nodes.len();
        (0..len)
            .map(|i| &self.nodes[(start + i) % len])
            .filter(|node| self.policy.may_pick(node))
            .take(n)
            .collect()
    }

    /// Number of nodes the policy can ever pick.
    pub fn eligible(&self) -> usize {
        self.nodes.iter().filter(|n| self.policy.may_pick(n)).count()
    }

    fn next_index(&self) -> usize {
        let len = self.nodes.len();
        match self.policy {
            SelectionPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % len,
            SelectionPolicy::Random => rand::rng().random_range(0..len),
            SelectionPolicy::Weighted => {
                let total: u64 = self.nodes.iter().map(|n| u64::from(n.weight)).sum();
                let mut ticket = rand::rng().random_range(0..total);
                for (idx, node) in self.nodes.iter().enumerate() {
                    let w = u64::from(node.weight);
                    if ticket < w {
                        return idx;
                    }
                    ticket -= w;
                }
                len - 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(urls: &[&str]) -> Vec<Node> {
        urls.iter().map(|u| Node::new(*u)).collect()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = NodeSelector::new("m", vec![], SelectionPolicy::RoundRobin).unwrap_err();
        assert!(matches!(err, ConfigError::NoNodes { .. }));
    }

    #[test]
    fn round_robin_cycles() {
        let s = NodeSelector::new("m", pool(&["a", "b", "c"]), SelectionPolicy::RoundRobin)
            .unwrap();
        let picked: Vec<_> = (0..6).map(|_| s.select().url.clone()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn random_stays_in_pool() {
        let s = NodeSelector::new("m", pool(&["a", "b"]), SelectionPolicy::Random).unwrap();
        for _ in 0..50 {
            assert!(["a", "b"].contains(&s.select().url.as_str()));
        }
    }

    #[test]
    fn weighted_skips_zero_weight() {
        let nodes = vec![Node::weighted("never", 0), Node::weighted("always", 5)];
        let s = NodeSelector::new("m", nodes, SelectionPolicy::Weighted).unwrap();
        for _ in 0..50 {
            assert_eq!(s.select().url, "always");
        }
    }

    #[test]
    fn all_zero_weights_rejected() {
        let nodes = vec![Node::weighted("a", 0)];
        assert!(NodeSelector::new("m", nodes, SelectionPolicy::Weighted).is_err());
    }

    #[test]
    fn distinct_nodes_do_not_repeat() {
        let s = NodeSelector::new("m", pool(&["a", "b", "c"]), SelectionPolicy::RoundRobin)
            .unwrap();
        let picked = s.select_distinct(5);
        assert_eq!(picked.len(), 3);
        let mut urls: Vec<_> = picked.iter().map(|n| n.url.as_str()).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 3);
    }

    #[test]
    fn distinct_weighted_leaves_out_drained_nodes() {
        let nodes = vec![
            Node::weighted("a", 2),
            Node::weighted("drained", 0),
            Node::weighted("b", 1),
        ];
        let s = NodeSelector::new("m", nodes, SelectionPolicy::Weighted).unwrap();
        assert_eq!(s.eligible(), 2);
        for _ in 0..50 {
            let picked = s.select_distinct(3);
            assert_eq!(picked.len(), 2);
            assert!(picked.iter().all(|n| n.url != "drained"));
        }
        // other policies still use every node
        let nodes = vec![Node::weighted("a", 0), Node::weighted("b", 0)];
        let s = NodeSelector::new("m", nodes, SelectionPolicy::RoundRobin).unwrap();
        assert_eq!(s.select_distinct(2).len(), 2);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("Weighted".parse::<SelectionPolicy>().unwrap(), SelectionPolicy::Weighted);
        assert!("fastest".parse::<SelectionPolicy>().is_err());
    }
}
