//! Normalized ledger model: the contract every decoder's output satisfies.

pub mod amount;
pub mod currency;
pub mod event;
pub mod tsv;
pub mod validate;

pub use amount::{negate, parse_effect, Amount};
pub use currency::{Currency, CurrencyFormat};
pub use event::{Event, EventSink, NONSTANDARD_SCRIPT, THE_VOID};
pub use tsv::{ExportPolicy, TsvError, NULL_MARKER};
pub use validate::{validate_block, LedgerRules, PrivacyModel};
