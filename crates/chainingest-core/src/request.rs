//! Wire types: dispatcher requests, raw HTTP exchanges and JSON-RPC 2.0 envelopes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP verb. Set explicitly on every call so a reused handle never carries
/// the previous call's method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// One HTTP exchange as handed to an [`HttpTransport`](crate::transport::HttpTransport).
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: HttpMethod,
    pub url: String,
    /// Serialized JSON body (POST only).
    pub body: Option<String>,
    pub timeout: Duration,
}

/// What came back from the wire, before any validation.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    /// HTTP status. `0` means the transport never got a status line.
    pub status: u16,
    pub body: Vec<u8>,
    /// Declared `Content-Length`; `None` when the body was streamed.
    pub content_length: Option<u64>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            content_length: Some(body.len() as u64),
            body,
        }
    }
}

/// Per-call behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFlags {
    /// Return `{}` / `[]` bodies as values instead of raising empty-result errors.
    pub allow_empty: bool,
    /// Quote bare numeric object values before decoding so large integers keep
    /// their exact digits.
    pub preserve_numbers: bool,
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self {
            allow_empty: false,
            preserve_numbers: true,
        }
    }
}

/// A request for [`RequestDispatcher`](crate::dispatcher::RequestDispatcher).
///
/// No body means GET, a body means POST with that JSON.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub body: Option<Value>,
    /// Field to extract from the decoded response, typically `"result"`.
    pub result_key: Option<String>,
    /// Falls back to the dispatcher default when unset.
    pub timeout: Option<Duration>,
    /// Falls back to the dispatcher default when unset.
    pub valid_codes: Option<Vec<u16>>,
    pub flags: RequestFlags,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            result_key: None,
            timeout: None,
            valid_codes: None,
            flags: RequestFlags::default(),
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// JSON-RPC 2.0 call whose `result` field is extracted.
    pub fn rpc(url: impl Into<String>, id: u64, method: &str, params: Vec<Value>) -> Self {
        let req = JsonRpcRequest::new(id, method, params);
        Self::post(url, serde_json::to_value(req).unwrap_or(Value::Null)).result("result")
    }

    pub fn result(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn valid_codes(mut self, codes: Vec<u16>) -> Self {
        self.valid_codes = Some(codes);
        self
    }

    pub fn allow_empty(mut self) -> Self {
        self.flags.allow_empty = true;
        self
    }

    pub fn raw_numbers(mut self) -> Self {
        self.flags.preserve_numbers = false;
        self
    }

    pub fn method(&self) -> HttpMethod {
        if self.body.is_some() {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }
}

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    /// Numeric ordering key; numeric strings count as numbers.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            Self::Null => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}
