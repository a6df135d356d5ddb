//! Structural and conservation checks over one block's decoder output.

use std::collections::{BTreeMap, HashSet};

use alloy_primitives::I256;
use serde::{Deserialize, Serialize};

use super::amount::{parse_effect, Amount};
use super::currency::{Currency, CurrencyFormat};
use super::event::Event;
use crate::error::{ConfigError, ProcessorError};
use crate::types::BlockId;

/// Whether event amounts are visible on this chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyModel {
    /// Every amount is known; value must be conserved per currency.
    #[default]
    Transparent,
    /// Some amounts are `+?` / `-?`.
    Mixed,
    /// Every amount is `+?` / `-?`.
    Shielded,
}

impl std::str::FromStr for PrivacyModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transparent" => Ok(Self::Transparent),
            "mixed" => Ok(Self::Mixed),
            "shielded" => Ok(Self::Shielded),
            _ => Err(ConfigError::InvalidValue {
                key: "privacy".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Module-level rules decoder output is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerRules {
    pub privacy: PrivacyModel,
    pub currency_format: CurrencyFormat,
}

/// Validate one block's events and currencies.
///
/// Fails on the first violation; nothing is truncated or repaired.
pub fn validate_block(
    block: BlockId,
    events: &[Event],
    currencies: &[Currency],
    rules: &LedgerRules,
) -> Result<(), ProcessorError> {
    let expected_block = block.as_i64();
    let multi = rules.currency_format.is_multi_currency();

    // currency key → running sum, or None once an unknown amount shows up
    let mut sums: BTreeMap<&str, Option<I256>> = BTreeMap::new();

    for (index, ev) in events.iter().enumerate() {
        if ev.block != expected_block {
            return Err(ProcessorError::invalid(
                index,
                format!("block {} does not match {}", ev.block, expected_block),
            ));
        }
        if ev.sort_key != index as u64 {
            return Err(ProcessorError::invalid(
                index,
                format!("sort_key {} out of emission order (expected {index})", ev.sort_key),
            ));
        }
        if ev.time != events[0].time {
            return Err(ProcessorError::invalid(index, "time differs within the block"));
        }
        if ev.address.is_empty() {
            return Err(ProcessorError::invalid(index, "empty address"));
        }
        if ev.transaction.as_deref() == Some("") {
            return Err(ProcessorError::invalid(index, "empty transaction hash"));
        }

        match (&ev.currency, multi) {
            (None, true) => {
                return Err(ProcessorError::invalid(index, "currency is required"));
            }
            (Some(c), false) => {
                return Err(ProcessorError::invalid(
                    index,
                    format!("single-currency module emitted currency '{c}'"),
                ));
            }
            (Some(c), true) if !rules.currency_format.accepts(c) => {
                return Err(ProcessorError::invalid(
                    index,
                    format!("currency '{c}' is not {:?}", rules.currency_format),
                ));
            }
            _ => {}
        }

        let amount = parse_effect(&ev.effect).map_err(|reason| ProcessorError::invalid(index, reason))?;
        let key = ev.currency.as_deref().unwrap_or("");
        match (amount, rules.privacy) {
            (Amount::Unknown { .. }, PrivacyModel::Transparent) => {
                return Err(ProcessorError::invalid(
                    index,
                    "unknown amount in a transparent module",
                ));
            }
            (Amount::Known(_), PrivacyModel::Shielded) => {
                return Err(ProcessorError::invalid(
                    index,
                    "known amount in a shielded module",
                ));
            }
            (Amount::Unknown { .. }, _) => {
                sums.insert(key, None);
            }
            (Amount::Known(value), _) => {
                let slot = sums.entry(key).or_insert(Some(I256::ZERO));
                if let Some(sum) = slot {
                    *sum = sum.checked_add(value).ok_or_else(|| {
                        ProcessorError::invalid(index, "effect sum overflows 256 bits")
                    })?;
                }
            }
        }
    }

    if rules.privacy != PrivacyModel::Shielded {
        for (currency, sum) in &sums {
            if let Some(sum) = sum {
                if !sum.is_zero() {
                    return Err(ProcessorError::ConservationViolated {
                        currency: if currency.is_empty() {
                            "<native>".into()
                        } else {
                            currency.to_string()
                        },
                        sum: sum.to_string(),
                    });
                }
            }
        }
    }

    validate_currencies(events, currencies, rules)
}

fn validate_currencies(
    events: &[Event],
    currencies: &[Currency],
    rules: &LedgerRules,
) -> Result<(), ProcessorError> {
    if currencies.is_empty() {
        return Ok(());
    }
    if !rules.currency_format.is_multi_currency() {
        return Err(ProcessorError::invalid(
            0,
            "single-currency module reported currencies",
        ));
    }

    let used: HashSet<&str> = events.iter().filter_map(|e| e.currency.as_deref()).collect();
    let mut seen = HashSet::new();
    for currency in currencies {
        if currency.id.is_empty() {
            return Err(ProcessorError::invalid(0, "currency with empty id"));
        }
        if !seen.insert(currency.id.as_str()) {
            return Err(ProcessorError::invalid(
                0,
                format!("currency '{}' reported twice", currency.id),
            ));
        }
        if !used.contains(currency.id.as_str()) {
            return Err(ProcessorError::invalid(
                0,
                format!("currency '{}' reported but not used by any event", currency.id),
            ));
        }
    }
    Ok(())
}
