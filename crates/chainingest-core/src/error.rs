//! Error taxonomy for request acquisition, consensus and block processing.
//!
//! Every kind is a separate variant so the driver can pick a policy per kind:
//! retry, abort, or treat-as-empty.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Broad class of an error, used by drivers to choose a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, refused connections, non-whitelisted HTTP status, short batches.
    Transient,
    /// Malformed, empty or incomplete responses.
    Shape,
    /// Consensus mismatches and invalid decoder output.
    Semantic,
    /// Misconfigured module. Fatal at initialization.
    Configuration,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Shape => write!(f, "shape"),
            Self::Semantic => write!(f, "semantic"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors raised by the request layer (transport + response validation).
#[derive(Debug, Error)]
pub enum RequesterError {
    /// Connection refused, reset, DNS failure, or a transport reporting status `0`.
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    /// The call did not complete before its deadline.
    #[error("request to {url} timed out after {ms}ms")]
    Timeout { url: String, ms: u64 },

    /// HTTP status outside the accepted set.
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// No body, or a body made only of whitespace.
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    /// Body was exactly `{}`.
    #[error("{url} returned an empty object")]
    EmptyObject { url: String },

    /// Body was exactly `[]`.
    #[error("{url} returned an empty array")]
    EmptyArray { url: String },

    /// Body could not be decoded as JSON, or did not have the expected shape.
    #[error("malformed response from {url}: {reason}")]
    MalformedJson { url: String, reason: String },

    /// Node returned an `error` payload.
    #[error("RPC error from {url}: {message}")]
    Rpc {
        url: String,
        code: Option<i64>,
        message: String,
    },

    /// Expected result key is absent from the response.
    #[error("response from {url} has no `{key}` field")]
    MissingKey { url: String, key: String },

    /// Expected result key is present but `null`.
    #[error("response from {url} has a null `{key}` field")]
    NullResult { url: String, key: String },

    /// A multi-request run collected fewer results than it issued.
    #[error("only {received} of {expected} requests succeeded (last error: {last_error})")]
    Shortfall {
        expected: usize,
        received: usize,
        last_error: String,
    },
}

impl RequesterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::Shortfall { .. } => ErrorClass::Transient,
            _ => ErrorClass::Shape,
        }
    }

    /// Returns `true` for `{}` / `[]` bodies, which some callers accept as valid-but-empty.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyObject { .. } | Self::EmptyArray { .. })
    }

    pub(crate) fn rpc(url: &str, err: &JsonRpcError) -> Self {
        Self::Rpc {
            url: url.to_string(),
            code: Some(err.code),
            message: err.message.clone(),
        }
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("module '{module}' has no nodes configured")]
    NoNodes { module: String },

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("module '{module}': {reason}")]
    Invalid { module: String, reason: String },
}

/// Errors surfaced by the block processor to its driver.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Requester(#[from] RequesterError),

    #[error("consensus mismatch for block {block} on `{field}`: {left_node}={left_value}, {right_node}={right_value}")]
    ConsensusMismatch {
        block: i64,
        field: String,
        left_node: String,
        left_value: String,
        right_node: String,
        right_value: String,
    },

    /// Decoder output violates a data-model rule.
    #[error("invalid output at event #{index}: {reason}")]
    InvalidOutput { index: usize, reason: String },

    #[error("value not conserved for currency '{currency}': sum is {sum}")]
    ConservationViolated { currency: String, sum: String },

    /// Decoder could not interpret a node response.
    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("lifecycle error: expected {expected}, processor is {actual}")]
    Lifecycle { expected: String, actual: String },

    #[error("module does not support {capability}")]
    Unsupported { capability: String },

    #[error("sink error: {0}")]
    Sink(String),
}

impl ProcessorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Requester(e) => e.class(),
            Self::Decode(_) => ErrorClass::Shape,
            Self::Config(_) | Self::Lifecycle { .. } | Self::Unsupported { .. } => {
                ErrorClass::Configuration
            }
            Self::ConsensusMismatch { .. }
            | Self::InvalidOutput { .. }
            | Self::ConservationViolated { .. }
            | Self::Sink(_) => ErrorClass::Semantic,
        }
    }

    /// Returns `true` if the driver may back off and try the same block again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Shape)
    }

    pub(crate) fn invalid(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            index,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        let e = RequesterError::Connection {
            url: "http://a".into(),
            reason: "refused".into(),
        };
        assert_eq!(e.class(), ErrorClass::Transient);
        let e = RequesterError::Shortfall {
            expected: 3,
            received: 2,
            last_error: "x".into(),
        };
        assert_eq!(e.class(), ErrorClass::Transient);
    }

    #[test]
    fn empty_results_are_distinguishable() {
        let e = RequesterError::EmptyArray { url: "http://a".into() };
        assert!(e.is_empty_result());
        assert_eq!(e.class(), ErrorClass::Shape);
        assert!(!RequesterError::EmptyBody { url: "http://a".into() }.is_empty_result());
    }

    #[test]
    fn semantic_errors_are_never_retryable() {
        let e = ProcessorError::ConservationViolated {
            currency: "ethereum".into(),
            sum: "1".into(),
        };
        assert!(!e.is_retryable());
        let e: ProcessorError = RequesterError::Timeout {
            url: "http://a".into(),
            ms: 10,
        }
        .into();
        assert!(e.is_retryable());
        let e: ProcessorError = ConfigError::NoNodes { module: "m".into() }.into();
        assert_eq!(e.class(), ErrorClass::Configuration);
        assert!(!e.is_retryable());
    }
}
