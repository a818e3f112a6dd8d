//! Execution module bridge for the TejX playground.
//!
//! A [`ModuleHost`] fetches a compiled WebAssembly module and runs it inside a
//! wasmtime sandbox; an [`ExecutionBridge`] puts a never-failing
//! `initialize` / `execute` contract in front of it and falls back to a
//! simulated result whenever no live module is available.

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod source;

pub use bridge::{ExecutionBridge, ExecutionResult, SIMULATED_PREFIX};
pub use config::{BridgeConfig, DEFAULT_MODULE_URL, MODULE_URL_ENV};
pub use error::{AcquireError, FetchError, GuestAbort, InvokeError};
pub use host::{HostState, InvokeOutput, ModuleHost, DEFAULT_FETCH_TIMEOUT, ENTRY_POINT};
pub use source::{source_for_address, BytesSource, FileSource, HttpSource, ModuleSource};

pub use wasmtime;
