//! UDF chain orchestration.
//!
//! The [`UdfManager`] owns an ordered chain of UDF handles and a fixed worker
//! pool. Workers independently drain the input queue, apply the chain to each
//! frame in configured order, honor the per-UDF verdicts, and publish
//! surviving frames to a bounded output queue with backpressure.
//!
//! Frames flow `input queue → worker → UDF₁ … UDFₙ → output queue`. Across
//! frames, parallelism equals the worker count and no inter-frame ordering is
//! guaranteed; configure `max_workers = 1` when downstream consumers need the
//! input order preserved.

mod config;
mod executor;
mod manager;

pub use config::{ManagerConfig, UdfEntry, DEFAULT_MAX_WORKERS};
pub use executor::ThreadExecutor;
pub use manager::UdfManager;
