use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure to obtain the module bytes from its source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid module address '{0}'")]
    InvalidAddress(String),

    #[error("module not found at {0}")]
    NotFound(String),

    #[error("fetching {address} failed with status {status}")]
    Status { address: String, status: u16 },

    #[error("network error fetching {address}: {message}")]
    Network { address: String, message: String },

    #[error("module fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("module resource at {0} is empty")]
    Empty(String),
}

/// Reason the host ended up `Unavailable`.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("sandbox setup failed: {0:#}")]
    Sandbox(wasmtime::Error),

    #[error("malformed module: {0:#}")]
    Compile(wasmtime::Error),

    #[error("failed to instantiate module: {0:#}")]
    Instantiate(wasmtime::Error),

    #[error("module does not export entry point '{0}' with signature (i32, i32, i32) -> i32")]
    MissingEntryPoint(String),

    #[error("module neither imports env.memory nor exports a memory")]
    NoMemory,

    #[error("module memory of {size} bytes has no room for the scratch area at {required} bytes; export `alloc` or a larger memory")]
    MemoryTooSmall { size: usize, required: usize },

    #[error("acquisition was cancelled before completing")]
    Cancelled,
}

impl AcquireError {
    /// True when the module could not be fetched at all, as opposed to a
    /// module that was fetched but rejected by the sandbox.
    pub fn is_fetch(&self) -> bool {
        matches!(self, AcquireError::Fetch(_))
    }
}

/// A call to `env.abort` made by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAbort {
    pub message: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for GuestAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module aborted: {}", self.message.as_deref().unwrap_or("<no message>"))?;
        match &self.file {
            Some(file) => write!(f, " ({}:{}:{})", file, self.line, self.column),
            None if self.line > 0 => write!(f, " (line {}:{})", self.line, self.column),
            None => Ok(()),
        }
    }
}

impl std::error::Error for GuestAbort {}

/// Failure of a single invocation of the live module.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("execution module is not ready")]
    NotReady,

    #[error("execution module is no longer running")]
    Unavailable,

    #[error("module does not export entry point '{0}'")]
    MissingEntryPoint(String),

    #[error(transparent)]
    Aborted(#[from] GuestAbort),

    #[error("execution trapped: {0}")]
    Trap(String),

    #[error("execution ran out of fuel")]
    OutOfFuel,

    #[error("source of {len} bytes does not fit in sandbox memory")]
    InputTooLarge { len: usize },

    #[error("module reported output at {ptr:#x}+{len} outside sandbox memory")]
    OutputOutOfBounds { ptr: u32, len: u32 },
}

impl InvokeError {
    /// Whether the failure belongs to this call on a live module.
    ///
    /// `NotReady` and `Unavailable` mean there is no module to blame; the
    /// bridge answers those on the simulated path instead.
    pub fn is_module_fault(&self) -> bool {
        !matches!(self, InvokeError::NotReady | InvokeError::Unavailable)
    }
}
