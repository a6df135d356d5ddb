//! HTTP transport backed by `reqwest`.
//!
//! One `reqwest::Client` (and its connection pool) is shared by every call.
//! The verb is set explicitly on each request so a pooled handle never
//! carries a previous call's method.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use chainingest_core::error::RequesterError;
use chainingest_core::request::{HttpCall, HttpMethod, RawResponse};
use chainingest_core::transport::HttpTransport;

/// Configuration for [`ReqwestTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    /// Idle keep-alive connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("chainingest/", env!("CARGO_PKG_VERSION")).into(),
            connect_timeout_ms: 10_000,
            pool_max_idle_per_host: 32,
        }
    }
}

pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn read_body(url: &str, timeout: Duration, mut resp: reqwest::Response) -> Result<Vec<u8>, RequesterError> {
        if resp.content_length().is_some() {
            return resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| wire_error(url, timeout, e));
        }

        // No declared length: harvest the body chunk by chunk.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| wire_error(url, timeout, e))? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, RequesterError> {
        let builder = match call.method {
            HttpMethod::Get => self.http.get(&call.url),
            HttpMethod::Post => self.http.post(&call.url),
        }
        .timeout(call.timeout);

        let builder = match call.body {
            Some(body) => builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body),
            None => builder,
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| wire_error(&call.url, call.timeout, e))?;

        let status = resp.status().as_u16();
        let content_length = resp.content_length();
        let body = Self::read_body(&call.url, call.timeout, resp).await?;

        tracing::trace!(
            url = %call.url,
            status,
            bytes = body.len(),
            streamed = content_length.is_none(),
            "response received"
        );

        Ok(RawResponse {
            status,
            body,
            content_length,
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

fn wire_error(url: &str, timeout: Duration, e: reqwest::Error) -> RequesterError {
    if e.is_timeout() {
        RequesterError::Timeout {
            url: url.to_string(),
            ms: timeout.as_millis() as u64,
        }
    } else {
        RequesterError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
