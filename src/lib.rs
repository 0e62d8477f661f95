//! Out-of-process decision execution for the ADM workbench.
//!
//! Aligned Decision Maker models run in a separate child process for:
//! - Memory reclaim: kill the process to free all accelerator/RAM state
//! - Crash isolation: a model crash doesn't kill the workbench
//!
//! The host side talks to the worker through an async request/response
//! bridge ([`supervisor::WorkerSupervisor`]) wrapped by the application
//! facade ([`client::DecisionClient`]). The worker side
//! ([`worker::run_worker`]) hosts loaded models keyed by configuration
//! fingerprint and answers one request at a time.

pub mod baseline;
pub mod cache_key;
pub mod client;
pub mod decider;
pub mod error;
pub mod hydration;
pub mod ipc;
pub mod process_manager;
pub mod settings;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use client::DecisionClient;
pub use error::{ExecError, Result};
pub use ipc::{ConfigurationSnapshot, Decision, DecisionResult};
pub use settings::ExecSettings;
