//! A conditional webhook step for multi-step event pipelines.
//!
//! Every event carries its own pipeline: an ordered list of steps and the
//! index of the step being processed. For the current step this crate
//! parses a condition such as `fieldname>=30 http://cb/webhook`, fires the
//! callback when the event matches, and then forwards the event to the next
//! step no matter what happened to the callback.
//!
//! ## Guarantees
//! - At most one callback per (callback, run) pair under sequential delivery
//! - Callback failures never block forwarding
//! - Accepted events are forwarded even if the sender hangs up early
//! - Shutdown, open requests included, finishes within the shutdown timeout
//! - Failures are reported to the run's error URL, best-effort
//!
//! ## Non-Guarantees
//! - Deduplication under concurrent delivery of the same run
//! - Backoff between retries
//! - Authentication of events or callbacks
//!
//! Callback bookkeeping lives in memory by default, or in Postgres when a
//! database URL is configured (`postgres` feature).

mod condition;
mod dispatcher;
mod drain;
mod error;
mod relay;
mod stdio;
mod storage;
mod types;

pub mod cli;
pub mod server;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use condition::{Condition, Relation, Threshold};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use drain::TaskSupervisor;
pub use error::{
    DispatchOutcome,
    FieldResolutionError,
    ForwardOutcome,
    ParseError,
    RelayError,
    StoreError,
    TransportError,
};
pub use relay::Relay;
pub use stdio::run_stdio;
pub use storage::{open_store, DedupStore, InMemoryStore};
pub use types::{DerivedValue, ErrorReport, EventData, PipelineEvent, RunId, RunMetadata, Step};

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
