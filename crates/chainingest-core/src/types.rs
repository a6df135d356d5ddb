//! Shared block-level types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Reserved block number meaning "the unconfirmed transaction pool".
pub const MEMPOOL_SENTINEL: i64 = -1;

/// Highest processable height. Heights are stored as `i64` in events, so
/// anything above would collide with negative numbers and the sentinel.
pub const MAX_HEIGHT: u64 = i64::MAX as u64;

// ─── BlockId ──────────────────────────────────────────────────────────────────

/// What `process_block` is asked to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    Height(u64),
    Mempool,
}

impl BlockId {
    /// `-1` maps to [`BlockId::Mempool`]; any other negative number is rejected.
    pub fn from_i64(value: i64) -> Result<Self, ConfigError> {
        match value {
            MEMPOOL_SENTINEL => Ok(Self::Mempool),
            v if v >= 0 => Ok(Self::Height(v as u64)),
            v => Err(ConfigError::InvalidValue {
                key: "block".into(),
                value: v.to_string(),
            }),
        }
    }

    /// Checked constructor for a confirmed height.
    pub fn height(value: u64) -> Result<Self, ConfigError> {
        if value > MAX_HEIGHT {
            return Err(ConfigError::InvalidValue {
                key: "block".into(),
                value: value.to_string(),
            });
        }
        Ok(Self::Height(value))
    }

    /// `Err` for a `Height` above [`MAX_HEIGHT`].
    pub fn check(self) -> Result<Self, ConfigError> {
        match self {
            Self::Height(h) => Self::height(h),
            Self::Mempool => Ok(self),
        }
    }

    /// Value stored in `Event::block`. Heights above [`MAX_HEIGHT`] saturate
    /// and never map to the sentinel; the processor rejects them up front.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Height(h) => i64::try_from(*h).unwrap_or(i64::MAX),
            Self::Mempool => MEMPOOL_SENTINEL,
        }
    }

    pub fn is_mempool(&self) -> bool {
        matches!(self, Self::Mempool)
    }
}

impl TryFrom<u64> for BlockId {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::height(value)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Height(h) => write!(f, "{h}"),
            Self::Mempool => write!(f, "mempool"),
        }
    }
}

// ─── BlockFingerprint ─────────────────────────────────────────────────────────

/// Canonical identifying fields of a block as served by one node.
///
/// Which fields go in (hash, parent hash, state root, ...) is up to the
/// decoder; the consensus check compares all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFingerprint {
    pub fields: BTreeMap<String, String>,
}

impl BlockFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// `hash` field, when the decoder provides one.
    pub fn hash(&self) -> Option<&str> {
        self.get("hash")
    }

    /// First field on which `self` and `other` disagree, with both values.
    /// A field present on only one side counts as a disagreement.
    pub fn first_difference<'a>(
        &'a self,
        other: &'a BlockFingerprint,
    ) -> Option<(&'a str, &'a str, &'a str)> {
        for (field, value) in &self.fields {
            match other.fields.get(field) {
                Some(theirs) if theirs == value => {}
                Some(theirs) => return Some((field.as_str(), value.as_str(), theirs.as_str())),
                None => return Some((field.as_str(), value.as_str(), "<missing>")),
            }
        }
        other
            .fields
            .iter()
            .find(|(field, _)| !self.fields.contains_key(*field))
            .map(|(field, value)| (field.as_str(), "<missing>", value.as_str()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
