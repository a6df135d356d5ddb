//! chainingest-http: the production [`HttpTransport`](chainingest_core::HttpTransport)
//! for ChainIngest, backed by `reqwest`.

pub mod client;

pub use client::{HttpClientConfig, ReqwestTransport};
