//! chainingest-evm: decoders for EVM chains.
//!
//! - [`EvmModule`]: native currency. Value transfers, fees split into
//!   miner tip and burnt base fee, withdrawals; mempool via the pending block.
//! - [`Erc20Module`]: token transfers from `Transfer` logs, one currency per
//!   token contract.

pub mod codec;
pub mod ens;
pub mod erc20;
pub mod native;
pub mod rpc;

pub use erc20::Erc20Module;
pub use native::{EvmModule, ReceiptMode};
