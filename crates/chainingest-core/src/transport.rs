//! The `HttpTransport` trait: the seam between the dispatcher and the wire.

use async_trait::async_trait;

use crate::error::RequesterError;
use crate::request::{HttpCall, RawResponse};

/// Executes one HTTP exchange.
///
/// Implementations report connection-level failures either as
/// `Err(RequesterError::Connection | Timeout)` or as a response with status `0`;
/// the dispatcher treats both the same way. Status and body validation is the
/// dispatcher's job, not the transport's.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so one transport can serve many
/// in-flight requests from the same task.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, RequesterError>;

    /// Identifier used in logs.
    fn name(&self) -> &str {
        "http"
    }
}
