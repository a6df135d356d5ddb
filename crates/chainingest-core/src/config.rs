//! Typed per-module configuration plus the key/value override table that is
//! resolved once at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::decoder::ModuleDescriptor;
use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;
use crate::ledger::{CurrencyFormat, ExportPolicy, LedgerRules, PrivacyModel};
use crate::selector::{Node, SelectionPolicy};

/// Prefix of environment variables picked up by [`ConfigOverrides::from_env`].
pub const ENV_PREFIX: &str = "CHAININGEST_";

/// Cross-node verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub enabled: bool,
    /// Accept the first node that answers instead of requiring agreement.
    pub break_on_first: bool,
    /// Distinct nodes sampled when agreement is required.
    pub sample_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            break_on_first: true,
            sample_size: 2,
        }
    }
}

/// Configuration for one chain module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module name, e.g. `"ethereum-main"`.
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Must match the decoder's own privacy model when set.
    #[serde(default)]
    pub privacy: Option<PrivacyModel>,
    /// Must match the decoder's own currency format when set.
    #[serde(default)]
    pub currency_format: Option<CurrencyFormat>,
    /// Currency id written for every event of a single-currency module.
    /// Falls back to the decoder's default.
    #[serde(default)]
    pub static_currency: Option<String>,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Decoder-specific settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
            selection: SelectionPolicy::default(),
            privacy: None,
            currency_format: None,
            static_currency: None,
            dispatcher: DispatcherConfig::default(),
            consensus: ConsensusConfig::default(),
            settings: BTreeMap::new(),
        }
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Resolve the ledger rules against what the decoder declares.
    pub fn ledger_rules(&self, descriptor: &ModuleDescriptor) -> Result<LedgerRules, ConfigError> {
        let privacy = self.privacy.unwrap_or(descriptor.privacy);
        if privacy != descriptor.privacy {
            return Err(self.invalid(format!(
                "privacy {privacy:?} conflicts with {} decoder ({:?})",
                descriptor.chain, descriptor.privacy
            )));
        }
        let currency_format = self.currency_format.unwrap_or(descriptor.currency_format);
        if currency_format != descriptor.currency_format {
            return Err(self.invalid(format!(
                "currency format {currency_format:?} conflicts with {} decoder ({:?})",
                descriptor.chain, descriptor.currency_format
            )));
        }
        Ok(LedgerRules {
            privacy,
            currency_format,
        })
    }

    /// Export settings for the TSV writer. `rules` comes from [`Self::ledger_rules`].
    pub fn export_policy(
        &self,
        descriptor: &ModuleDescriptor,
        rules: &LedgerRules,
    ) -> Result<ExportPolicy, ConfigError> {
        let static_currency = self
            .static_currency
            .clone()
            .or_else(|| descriptor.static_currency.map(str::to_string));
        match (rules.currency_format, &static_currency) {
            (CurrencyFormat::Static, None) => {
                return Err(self.invalid("static currency format needs `static_currency`"))
            }
            (f, Some(_)) if f.is_multi_currency() && self.static_currency.is_some() => {
                return Err(self.invalid("`static_currency` is only valid for static format"))
            }
            _ => {}
        }
        Ok(ExportPolicy {
            module: self.name.clone(),
            format: rules.currency_format,
            static_currency: static_currency.filter(|_| !rules.currency_format.is_multi_currency()),
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            module: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check the invariants that do not depend on the decoder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| self.invalid(reason);

        if self.name.trim().is_empty() {
            return Err(invalid("module name is empty"));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes {
                module: self.name.clone(),
            });
        }
        if self.nodes.iter().any(|n| n.url.trim().is_empty()) {
            return Err(invalid("node with empty url"));
        }
        if self.dispatcher.timeout_ms == 0 {
            return Err(invalid("dispatcher timeout must be positive"));
        }
        if self.dispatcher.concurrency == 0 {
            return Err(invalid("dispatcher concurrency must be positive"));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(invalid("dispatcher batch size must be positive"));
        }
        if self.dispatcher.valid_codes.is_empty() {
            return Err(invalid("no valid HTTP status codes"));
        }
        if self.consensus.enabled && !self.consensus.break_on_first {
            if self.consensus.sample_size < 2 {
                return Err(invalid("consensus sample size must be at least 2"));
            }
            let usable = self.nodes.iter().filter(|n| self.selection.may_pick(n)).count();
            if usable < 2 {
                return Err(invalid("consensus needs at least 2 distinct selectable nodes"));
            }
        }
        Ok(())
    }
}

/// Flat key/value overrides, e.g. from the environment.
///
/// Keys look like `MODULE_<NAME>_<FIELD>` where `<NAME>` is the module name
/// upper-cased with `-` replaced by `_`. Fields: `NODES` (comma list),
/// `SELECTION`, `PRIVACY`, `CURRENCY_FORMAT`, `TIMEOUT_MS`, `CONCURRENCY`, `BATCH_SIZE`,
/// `CONSENSUS`, `BREAK_ON_FIRST`, `SAMPLE_SIZE`, and `SETTING_<KEY>`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    values: BTreeMap<String, String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Collect every `CHAININGEST_*` environment variable.
    pub fn from_env() -> Self {
        let values = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|k| (k.to_string(), v)))
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply every override addressed to `config`'s module. Unknown fields are errors.
    pub fn apply(&self, config: &mut ModuleConfig) -> Result<(), ConfigError> {
        let prefix = format!(
            "MODULE_{}_",
            config.name.to_ascii_uppercase().replace('-', "_")
        );

        for (key, value) in &self.values {
            let Some(field) = key.strip_prefix(&prefix) else {
                continue;
            };
            tracing::debug!(module = %config.name, field, "applying config override");

            if let Some(setting) = field.strip_prefix("SETTING_") {
                config
                    .settings
                    .insert(setting.to_ascii_lowercase(), value.clone());
                continue;
            }

            match field {
                "NODES" => {
                    config.nodes = value
                        .split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(Node::new)
                        .collect();
                }
                "SELECTION" => config.selection = value.parse()?,
                "PRIVACY" => config.privacy = Some(value.parse()?),
                "CURRENCY_FORMAT" => config.currency_format = Some(value.parse()?),
                "TIMEOUT_MS" => config.dispatcher.timeout_ms = parse_num(key, value)?,
                "CONCURRENCY" => config.dispatcher.concurrency = parse_num(key, value)?,
                "BATCH_SIZE" => config.dispatcher.batch_size = parse_num(key, value)?,
                "SAMPLE_SIZE" => config.consensus.sample_size = parse_num(key, value)?,
                "CONSENSUS" => config.consensus.enabled = parse_bool(key, value)?,
                "BREAK_ON_FIRST" => config.consensus.break_on_first = parse_bool(key, value)?,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: key.clone(),
                        value: "unknown option".into(),
                    })
                }
            }
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModuleConfig {
        ModuleConfig::new(
            "ethereum-main",
            vec![Node::new("http://a"), Node::new("http://b")],
        )
    }

    fn descriptor(format: CurrencyFormat, static_currency: Option<&'static str>) -> ModuleDescriptor {
        ModuleDescriptor {
            chain: "ethereum",
            privacy: PrivacyModel::Transparent,
            currency_format: format,
            static_currency,
            mempool: true,
        }
    }

    #[test]
    fn default_config_is_valid() {
        base().validate().unwrap();
    }

    #[test]
    fn static_currency_falls_back_to_decoder() {
        let cfg = base();
        let d = descriptor(CurrencyFormat::Static, Some("ethereum"));
        let rules = cfg.ledger_rules(&d).unwrap();
        let policy = cfg.export_policy(&d, &rules).unwrap();
        assert_eq!(policy.static_currency.as_deref(), Some("ethereum"));

        let d = descriptor(CurrencyFormat::Static, None);
        assert!(cfg.export_policy(&d, &rules).is_err());
    }

    #[test]
    fn config_cannot_contradict_decoder() {
        let mut cfg = base();
        cfg.currency_format = Some(CurrencyFormat::Numeric);
        assert!(cfg.ledger_rules(&descriptor(CurrencyFormat::Hex0x, None)).is_err());

        cfg.currency_format = Some(CurrencyFormat::Hex0x);
        cfg.static_currency = Some("ethereum".into());
        let d = descriptor(CurrencyFormat::Hex0x, None);
        let rules = cfg.ledger_rules(&d).unwrap();
        assert!(cfg.export_policy(&d, &rules).is_err());
    }

    #[test]
    fn strict_consensus_needs_two_nodes() {
        let mut cfg = base();
        cfg.consensus.break_on_first = false;
        cfg.validate().unwrap();
        cfg.nodes.truncate(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn drained_nodes_do_not_count_toward_strict_consensus() {
        let mut cfg = base();
        cfg.consensus.break_on_first = false;
        cfg.selection = SelectionPolicy::Weighted;
        cfg.nodes = vec![Node::weighted("http://a", 3), Node::weighted("http://b", 0)];
        assert!(cfg.validate().is_err());

        cfg.nodes.push(Node::weighted("http://c", 1));
        cfg.validate().unwrap();
    }

    #[test]
    fn overrides_apply_to_matching_module() {
        let mut o = ConfigOverrides::new();
        o.insert("MODULE_ETHEREUM_MAIN_NODES", "http://x, http://y,,http://z");
        o.insert("MODULE_ETHEREUM_MAIN_CONCURRENCY", "4");
        o.insert("MODULE_ETHEREUM_MAIN_BREAK_ON_FIRST", "no");
        o.insert("MODULE_ETHEREUM_MAIN_SELECTION", "random");
        o.insert("MODULE_ETHEREUM_MAIN_SETTING_CHAIN_ID", "1");
        o.insert("MODULE_BITCOIN_MAIN_NODES", "http://ignored");

        let mut cfg = base();
        o.apply(&mut cfg).unwrap();

        let urls: Vec<_> = cfg.nodes.iter().map(|n| n.url.as_str()).collect();
        assert_eq!(urls, vec!["http://x", "http://y", "http://z"]);
        assert_eq!(cfg.dispatcher.concurrency, 4);
        assert!(!cfg.consensus.break_on_first);
        assert_eq!(cfg.selection, SelectionPolicy::Random);
        assert_eq!(cfg.setting("chain_id"), Some("1"));
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_override_is_fatal() {
        let mut o = ConfigOverrides::new();
        o.insert("MODULE_ETHEREUM_MAIN_TURBO", "1");
        assert!(o.apply(&mut base()).is_err());

        let mut o = ConfigOverrides::new();
        o.insert("MODULE_ETHEREUM_MAIN_CONCURRENCY", "many");
        assert!(o.apply(&mut base()).is_err());
    }

    #[test]
    fn config_from_toml_like_json() {
        let cfg: ModuleConfig = serde_json::from_value(serde_json::json!({
            "name": "tether-erc-20",
            "nodes": [{ "url": "http://a", "weight": 3 }, { "url": "http://b" }],
            "selection": "weighted",
            "currency_format": "hex0x",
            "consensus": { "break_on_first": false }
        }))
        .unwrap();
        assert_eq!(cfg.nodes[1].weight, 1);
        assert_eq!(cfg.currency_format, Some(CurrencyFormat::Hex0x));
        assert!(cfg.consensus.enabled);
        assert_eq!(cfg.consensus.sample_size, 2);
        cfg.validate().unwrap();
    }
}
