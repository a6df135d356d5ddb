//! `RequestDispatcher`: single, sliding-window and JSON-RPC batch calls with
//! response-shape validation.
//!
//! The dispatcher never retries. Every failure comes back as a typed
//! [`RequesterError`] and the caller decides what to do with it.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequesterError;
use crate::numeric::quote_numbers;
use crate::request::{HttpCall, JsonRpcError, JsonRpcRequest, RawResponse, Request, RpcId};
use crate::transport::HttpTransport;

/// Defaults applied to requests that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Accepted HTTP status codes.
    pub valid_codes: Vec<u16>,
    /// In-flight ceiling for [`RequestDispatcher::multi`].
    pub concurrency: usize,
    /// Entries per JSON-RPC batch body.
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            valid_codes: vec![200],
            concurrency: 10,
            batch_size: 50,
        }
    }
}

impl DispatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Issues requests through an [`HttpTransport`] and validates what comes back.
#[derive(Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn HttpTransport>,
    config: DispatcherConfig,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, config: DispatcherConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Issue one call and return the validated (and optionally extracted) value.
    pub async fn single(&self, req: Request) -> Result<Value, RequesterError> {
        let timeout = req.timeout.unwrap_or_else(|| self.config.timeout());
        let call = HttpCall {
            method: req.method(),
            url: req.url.clone(),
            body: req.body.as_ref().map(Value::to_string),
            timeout,
        };

        tracing::debug!(method = %call.method, url = %call.url, "dispatching request");

        let raw = tokio::time::timeout(timeout, self.transport.execute(call))
            .await
            .map_err(|_| RequesterError::Timeout {
                url: req.url.clone(),
                ms: timeout.as_millis() as u64,
            })??;

        self.validate(&req, raw)
    }

    /// Run `reqs` with at most `limit` in flight, admitting the next queued
    /// request as soon as any slot frees up.
    ///
    /// Results come back in request order. Any failed item turns the whole
    /// call into [`RequesterError::Shortfall`].
    pub async fn multi(
        &self,
        reqs: Vec<Request>,
        limit: usize,
    ) -> Result<Vec<Value>, RequesterError> {
        let expected = reqs.len();
        let limit = limit.max(1);

        let mut window = stream::iter(reqs.into_iter().enumerate())
            .map(|(idx, req)| async move { (idx, self.single(req).await) })
            .buffer_unordered(limit);

        let mut collected: Vec<(usize, Value)> = Vec::with_capacity(expected);
        let mut last_error: Option<RequesterError> = None;

        while let Some((idx, outcome)) = window.next().await {
            match outcome {
                Ok(value) => collected.push((idx, value)),
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "multi request item failed");
                    last_error = Some(e);
                }
            }
        }

        if collected.len() != expected {
            return Err(RequesterError::Shortfall {
                expected,
                received: collected.len(),
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            });
        }

        collected.sort_by_key(|(idx, _)| *idx);
        Ok(collected.into_iter().map(|(_, v)| v).collect())
    }

    /// Send `reqs` as one JSON-RPC batch body and return each `result`,
    /// positionally matching `reqs`.
    pub async fn batch(
        &self,
        url: &str,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<Value>, RequesterError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let wanted = request_ids(url, &reqs)?;
        let expected = reqs.len();
        let body = serde_json::to_value(&reqs).map_err(|e| RequesterError::MalformedJson {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let value = self.single(Request::post(url, body)).await?;
        let entries = match value {
            Value::Array(entries) => entries,
            other => {
                return Err(RequesterError::MalformedJson {
                    url: url.to_string(),
                    reason: format!("expected a batch array, got {}", kind_of(&other)),
                })
            }
        };

        if entries.len() != expected {
            return Err(RequesterError::Shortfall {
                expected,
                received: entries.len(),
                last_error: "batch response is missing entries".into(),
            });
        }

        align_to_requests(url, &wanted, entries)?
            .into_iter()
            .map(|entry| take_result(url, entry))
            .collect()
    }

    fn validate(&self, req: &Request, raw: RawResponse) -> Result<Value, RequesterError> {
        let url = req.url.as_str();

        if raw.status == 0 {
            return Err(RequesterError::Connection {
                url: url.to_string(),
                reason: "no HTTP status (connection failed or timed out)".into(),
            });
        }

        let codes = req
            .valid_codes
            .as_deref()
            .unwrap_or(&self.config.valid_codes);
        if !codes.contains(&raw.status) {
            return Err(RequesterError::HttpStatus {
                url: url.to_string(),
                status: raw.status,
            });
        }

        let body = std::str::from_utf8(&raw.body).map_err(|e| RequesterError::MalformedJson {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let body = body.trim();

        if body.is_empty() {
            return Err(RequesterError::EmptyBody { url: url.to_string() });
        }
        if !req.flags.allow_empty {
            match body {
                "{}" => return Err(RequesterError::EmptyObject { url: url.to_string() }),
                "[]" => return Err(RequesterError::EmptyArray { url: url.to_string() }),
                _ => {}
            }
        }

        let text = if req.flags.preserve_numbers {
            Cow::Owned(quote_numbers(body))
        } else {
            Cow::Borrowed(body)
        };

        let value = decode_json(&text).map_err(|e| RequesterError::MalformedJson {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(rpc_error(url, err));
        }

        match &req.result_key {
            None => Ok(value),
            Some(key) => extract(url, value, key),
        }
    }
}

/// Sort JSON-RPC batch responses by their `id` so they line up with the
/// requests that produced them. Two entries with the same id are rejected.
pub fn reorder_by_id(url: &str, mut entries: Vec<Value>) -> Result<Vec<Value>, RequesterError> {
    let mut keys = Vec::with_capacity(entries.len());
    for entry in &entries {
        let id = entry_id(entry).ok_or_else(|| malformed(url, "batch entry has no sortable id"))?;
        keys.push(id);
    }

    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| keys[i]);
    if let Some(pair) = order.windows(2).find(|w| keys[w[0]] == keys[w[1]]) {
        return Err(malformed(url, format!("batch response repeats id {}", keys[pair[0]])));
    }

    let mut slots: Vec<Option<Value>> = entries.drain(..).map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn entry_id(entry: &Value) -> Option<u64> {
    entry
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RpcId>(id).ok())
        .and_then(|id| id.as_u64())
}

/// Numeric request ids sorted ascending, each with its position in `reqs`.
fn request_ids(url: &str, reqs: &[JsonRpcRequest]) -> Result<Vec<(u64, usize)>, RequesterError> {
    let mut ids = Vec::with_capacity(reqs.len());
    for (pos, req) in reqs.iter().enumerate() {
        let id = req
            .id
            .as_u64()
            .ok_or_else(|| malformed(url, format!("batch request id {} is not numeric", req.id)))?;
        ids.push((id, pos));
    }
    ids.sort_unstable();
    if let Some(pair) = ids.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(malformed(url, format!("batch repeats request id {}", pair[0].0)));
    }
    Ok(ids)
}

/// Put response entries in request order. The response ids must be exactly
/// the request ids: none missing, none repeated, none unknown.
fn align_to_requests(
    url: &str,
    wanted: &[(u64, usize)],
    entries: Vec<Value>,
) -> Result<Vec<Value>, RequesterError> {
    let sorted = reorder_by_id(url, entries)?;
    let got: Vec<u64> = sorted.iter().filter_map(entry_id).collect();
    let want: Vec<u64> = wanted.iter().map(|(id, _)| *id).collect();
    if got != want {
        return Err(malformed(
            url,
            format!("batch response ids {got:?} do not match request ids {want:?}"),
        ));
    }

    let mut slots: Vec<Option<Value>> = vec![None; wanted.len()];
    for ((_, pos), entry) in wanted.iter().zip(sorted) {
        slots[*pos] = Some(entry);
    }
    Ok(slots.into_iter().flatten().collect())
}

fn malformed(url: &str, reason: impl Into<String>) -> RequesterError {
    RequesterError::MalformedJson {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn take_result(url: &str, entry: Value) -> Result<Value, RequesterError> {
    if let Some(err) = entry.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error(url, err));
    }
    extract(url, entry, "result")
}

fn extract(url: &str, value: Value, key: &str) -> Result<Value, RequesterError> {
    let mut map = match value {
        Value::Object(map) => map,
        _ => {
            return Err(RequesterError::MissingKey {
                url: url.to_string(),
                key: key.to_string(),
            })
        }
    };
    match map.remove(key) {
        None => Err(RequesterError::MissingKey {
            url: url.to_string(),
            key: key.to_string(),
        }),
        Some(Value::Null) => Err(RequesterError::NullResult {
            url: url.to_string(),
            key: key.to_string(),
        }),
        Some(v) => Ok(v),
    }
}

/// Numbers may have been quoted by the precision pre-pass, so the error
/// object is read leniently instead of through `JsonRpcError`'s derive.
fn rpc_error(url: &str, err: &Value) -> RequesterError {
    let code = err.get("code").and_then(|c| {
        c.as_i64()
            .or_else(|| c.as_str().and_then(|s| s.parse().ok()))
    });
    let message = match err.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    match code {
        Some(code) => RequesterError::rpc(
            url,
            &JsonRpcError {
                code,
                message,
                data: err.get("data").cloned(),
            },
        ),
        None => RequesterError::Rpc {
            url: url.to_string(),
            code: None,
            message,
        },
    }
}

fn decode_json(text: &str) -> Result<Value, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
