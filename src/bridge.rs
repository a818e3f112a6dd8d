//! Caller-facing surface of the playground runtime.
//!
//! [`ExecutionBridge`] answers every request, whether or not a live module
//! could be loaded. Without one it falls back to a simulated result whose
//! lines all start with [`SIMULATED_PREFIX`], so a UI can tell the two apart
//! from the lines alone.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::host::{HostState, InvokeOutput, ModuleHost, ENTRY_POINT};

/// Marker carried by every line of a simulated result.
pub const SIMULATED_PREFIX: &str = "[Simulated]";

/// Outcome of one `execute` call.
///
/// Serializes to `{ "lines": [..], "success": bool, "error"?: string }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub lines: Vec<String>,
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

impl ExecutionResult {
    /// Result produced when no live module is available.
    ///
    /// Depends only on `source`; the program itself is never run.
    pub fn simulated(source: &str) -> Self {
        Self {
            lines: vec![
                format!("{SIMULATED_PREFIX} Input length: {}", source.chars().count()),
                format!("{SIMULATED_PREFIX} No execution module loaded"),
                format!("{SIMULATED_PREFIX} Done 0"),
            ],
            succeeded: true,
            failure_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            lines: Vec::new(),
            succeeded: false,
            failure_detail: Some(detail.into()),
        }
    }

    /// Map the entry point's return: status `0` is success, anything else
    /// fails while keeping whatever the module printed.
    pub fn from_output(output: InvokeOutput) -> Self {
        let lines = output.lines();
        if output.status == 0 {
            Self {
                lines,
                succeeded: true,
                failure_detail: None,
            }
        } else {
            Self {
                lines,
                succeeded: false,
                failure_detail: Some(format!("module exited with status {}", output.status)),
            }
        }
    }

    pub fn is_simulated(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|line| line.starts_with(SIMULATED_PREFIX))
    }

    pub fn to_json(&self) -> String {
        // Plain strings and a bool; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Stable `initialize` / `execute` contract over a [`ModuleHost`].
#[derive(Debug)]
pub struct ExecutionBridge {
    host: ModuleHost,
}

impl ExecutionBridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_host(ModuleHost::from_config(config))
    }

    pub fn with_host(host: ModuleHost) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &ModuleHost {
        &self.host
    }

    pub fn state(&self) -> HostState {
        self.host.state()
    }

    /// Acquire the module. Safe to call repeatedly or concurrently; failure
    /// is only visible through [`state`](Self::state) and `execute`.
    pub async fn initialize(&self) {
        let state = self.host.acquire().await;
        debug!(%state, "bridge initialized");
    }

    /// Run `source`. Never fails and never waits for an acquisition.
    pub async fn execute(&self, source: &str) -> ExecutionResult {
        if !self.host.is_ready() {
            return ExecutionResult::simulated(source);
        }
        match self.host.invoke(ENTRY_POINT, source).await {
            Ok(output) => ExecutionResult::from_output(output),
            Err(e) if e.is_module_fault() => {
                warn!(error = %e, "execution failed");
                ExecutionResult::failed(e.to_string())
            }
            Err(e) => {
                debug!(error = %e, "live module unreachable, simulating");
                ExecutionResult::simulated(source)
            }
        }
    }
}
