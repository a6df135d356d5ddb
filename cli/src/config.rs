//! The `chainingest.toml` file: a `[log]` section plus one `[[modules]]`
//! table per chain module.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use chainingest_core::{ConfigOverrides, ModuleConfig};

use crate::logging::LogConfig;

/// Which decoder drives a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// Native currency of an EVM chain.
    Evm,
    /// ERC-20 token transfers on an EVM chain.
    Erc20,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub decoder: DecoderKind,
    #[serde(flatten)]
    pub module: ModuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parse config file '{}'", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The module called `name` (or the only configured one) with `overrides`
    /// applied and validated.
    pub fn module(&self, name: Option<&str>, overrides: &ConfigOverrides) -> Result<ModuleEntry> {
        let entry = match name {
            Some(name) => self
                .modules
                .iter()
                .find(|m| m.module.name == name)
                .ok_or_else(|| anyhow!("no module named '{name}' in the config file"))?,
            None => match self.modules.as_slice() {
                [only] => only,
                [] => bail!("the config file defines no modules"),
                _ => bail!(
                    "several modules configured ({}); pick one with --module",
                    self.names().join(", ")
                ),
            },
        };

        let mut entry = entry.clone();
        overrides.apply(&mut entry.module)?;
        entry.module.validate()?;
        Ok(entry)
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.module.name.as_str()).collect()
    }
}
