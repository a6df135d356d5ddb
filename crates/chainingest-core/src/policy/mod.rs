//! Reliability policies applied by the drivers around block processing.
//!
//! Requests themselves are never retried; a failed block is retried whole,
//! after the delay computed here.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
