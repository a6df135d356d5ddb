//! chainingest-core: the chain-agnostic half of the ChainIngest engine.
//!
//! # Architecture
//!
//! ```text
//! RangeDriver / Monitor ──► BlockProcessor ──► BlockSink (memory / TSV)
//!                               ├── NodeSelector      (round-robin / random / weighted)
//!                               ├── ConsensusChecker  (fingerprints from distinct nodes)
//!                               ├── RequestDispatcher (single / multi / batch over HttpTransport)
//!                               ├── BlockDecoder      (chain-specific, with optional capabilities)
//!                               └── ledger::validate  (shape, privacy, conservation)
//! ```
//!
//! A decoder turns one block into [`ledger::Event`]s; the engine decides which
//! node to ask, checks that nodes agree, rejects anything that does not
//! balance, and leaves retrying to the drivers.

pub mod capability;
pub mod config;
pub mod consensus;
pub mod decoder;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod numeric;
pub mod policy;
pub mod processor;
pub mod request;
pub mod selector;
pub mod sink;
pub mod transport;
pub mod types;

pub use config::{ConfigOverrides, ConsensusConfig, ModuleConfig};
pub use consensus::{Agreement, ConsensusChecker};
pub use decoder::{BlockDecoder, DecodedBlock, FetchContext, ModuleDescriptor};
pub use dispatcher::{DispatcherConfig, RequestDispatcher};
pub use driver::{Monitor, MonitorConfig, MonitorReport, RangeDriver, RangeReport};
pub use error::{ConfigError, ErrorClass, ProcessorError, RequesterError};
pub use policy::{RetryConfig, RetryPolicy};
pub use processor::{BlockPhase, BlockProcessor, ProcessedBlock, ProcessorState};
pub use request::{HttpCall, HttpMethod, JsonRpcRequest, RawResponse, Request, RpcId};
pub use selector::{Node, NodeSelector, SelectionPolicy};
pub use sink::{BlockSink, MemorySink, TsvSink};
pub use transport::HttpTransport;
pub use types::{BlockFingerprint, BlockId, MAX_HEIGHT, MEMPOOL_SENTINEL};
