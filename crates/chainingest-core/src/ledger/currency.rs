//! Currency records and per-module currency id formats.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One asset definition. Only `id` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u32>,
    pub description: Option<String>,
}

impl Currency {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            symbol: None,
            decimals: None,
            description: None,
        }
    }
}

/// How a module spells currency ids in its events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyFormat {
    /// Single-currency module; events carry no currency.
    #[default]
    Static,
    Numeric,
    Alphanumeric,
    /// `0x`-prefixed hex.
    #[serde(rename = "hex0x")]
    Hex0x,
    /// Bare hex.
    Hex,
}

impl CurrencyFormat {
    pub fn is_multi_currency(&self) -> bool {
        !matches!(self, Self::Static)
    }

    /// Returns `true` if `id` is well-formed for this format.
    pub fn accepts(&self, id: &str) -> bool {
        match self {
            Self::Static => false,
            Self::Numeric => !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()),
            Self::Alphanumeric => !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric()),
            Self::Hex0x => id
                .strip_prefix("0x")
                .is_some_and(|h| !h.is_empty() && h.bytes().all(|b| b.is_ascii_hexdigit())),
            Self::Hex => !id.is_empty() && id.bytes().all(|b| b.is_ascii_hexdigit()),
        }
    }
}

impl std::str::FromStr for CurrencyFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "numeric" => Ok(Self::Numeric),
            "alphanumeric" => Ok(Self::Alphanumeric),
            "hex0x" | "0xhex" => Ok(Self::Hex0x),
            "hex" => Ok(Self::Hex),
            _ => Err(ConfigError::InvalidValue {
                key: "currency_format".into(),
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_acceptance() {
        assert!(CurrencyFormat::Numeric.accepts("31"));
        assert!(!CurrencyFormat::Numeric.accepts("3a"));
        assert!(CurrencyFormat::Alphanumeric.accepts("USDT"));
        assert!(!CurrencyFormat::Alphanumeric.accepts("US-DT"));
        assert!(CurrencyFormat::Hex0x.accepts("0xdAC17F958D2ee523a2206206994597C13D831ec7"));
        assert!(!CurrencyFormat::Hex0x.accepts("0x"));
        assert!(!CurrencyFormat::Hex0x.accepts("dac17f"));
        assert!(CurrencyFormat::Hex.accepts("dac17f"));
        assert!(!CurrencyFormat::Static.accepts("anything"));
    }

    #[test]
    fn multi_currency_flag() {
        assert!(!CurrencyFormat::Static.is_multi_currency());
        assert!(CurrencyFormat::Hex.is_multi_currency());
    }
}
