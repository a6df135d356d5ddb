//! Optional per-module capabilities beyond block decoding.
//!
//! A decoder exposes the ones it supports through the accessors on
//! [`BlockDecoder`](crate::decoder::BlockDecoder); the processor answers
//! `Unsupported` for the rest.

use async_trait::async_trait;
use serde_json::Value;

use crate::decoder::FetchContext;
use crate::error::ProcessorError;

/// Current balance of one address.
#[async_trait]
pub trait BalanceLookup: Send + Sync {
    /// Balance as an integer string in the currency's smallest unit.
    async fn balance(
        &self,
        ctx: &FetchContext,
        address: &str,
        currency: Option<&str>,
    ) -> Result<String, ProcessorError>;
}

/// Balances of many addresses in fewer round trips.
#[async_trait]
pub trait MultiBalanceLookup: Send + Sync {
    /// One balance per address, in input order.
    async fn balances(
        &self,
        ctx: &FetchContext,
        addresses: &[String],
        currency: Option<&str>,
    ) -> Result<Vec<String>, ProcessorError>;
}

/// Chain-specific details about a transaction.
#[async_trait]
pub trait TransactionSpecials: Send + Sync {
    async fn transaction_specials(
        &self,
        ctx: &FetchContext,
        transaction: &str,
    ) -> Result<Value, ProcessorError>;
}

/// Chain-specific details about an address (contract flag, nonce, ...).
#[async_trait]
pub trait AddressSpecials: Send + Sync {
    async fn address_specials(&self, ctx: &FetchContext, address: &str) -> Result<Value, ProcessorError>;
}

#[async_trait]
pub trait CurrencySupply: Send + Sync {
    /// Total supply as an integer string; `None` means the native currency.
    async fn currency_supply(
        &self,
        ctx: &FetchContext,
        currency: Option<&str>,
    ) -> Result<String, ProcessorError>;
}

/// Resolves human-readable handles (names, aliases) to addresses.
#[async_trait]
pub trait HandleResolver: Send + Sync {
    /// `Ok(None)` when the handle is well-formed but unregistered.
    async fn resolve_handle(
        &self,
        ctx: &FetchContext,
        handle: &str,
    ) -> Result<Option<String>, ProcessorError>;
}

#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    /// Submit a signed raw transaction and return its hash.
    async fn broadcast_transaction(
        &self,
        ctx: &FetchContext,
        raw: &str,
    ) -> Result<String, ProcessorError>;
}
