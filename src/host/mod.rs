mod channel;
mod inbox;
mod sandbox;

pub use sandbox::ENTRY_POINT;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{AcquireError, FetchError, InvokeError};
use crate::source::{source_for_address, ModuleSource};

use channel::{send_invoke, InvokeTask};
use inbox::inbox_loop;
use sandbox::Sandbox;

/// Upper bound on a single fetch of the module binary.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable lifecycle state of a [`ModuleHost`].
#[derive(Debug, Clone)]
pub enum HostState {
    Uninitialized,
    Loading,
    Ready,
    Unavailable(Arc<AcquireError>),
}

impl HostState {
    pub fn is_ready(&self) -> bool {
        matches!(self, HostState::Ready)
    }

    /// Why acquisition failed, when it did.
    pub fn reason(&self) -> Option<&AcquireError> {
        match self {
            HostState::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Uninitialized => f.write_str("uninitialized"),
            HostState::Loading => f.write_str("loading"),
            HostState::Ready => f.write_str("ready"),
            HostState::Unavailable(reason) => write!(f, "unavailable: {reason}"),
        }
    }
}

/// What the entry point returned, plus the bytes it pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutput {
    pub status: i32,
    pub output: Vec<u8>,
}

impl InvokeOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

/// Live instantiation. Dropping the last handle stops the sandbox task,
/// which releases the store and its memory.
struct ModuleHandle {
    tx: mpsc::UnboundedSender<InvokeTask>,
}

/// Internal state: `HostState` with the handle attached to `Ready`.
enum Phase {
    Uninitialized,
    Loading,
    Ready(ModuleHandle),
    Unavailable(Arc<AcquireError>),
}

impl Phase {
    fn state(&self) -> HostState {
        match self {
            Phase::Uninitialized => HostState::Uninitialized,
            Phase::Loading => HostState::Loading,
            Phase::Ready(_) => HostState::Ready,
            Phase::Unavailable(reason) => HostState::Unavailable(reason.clone()),
        }
    }
}

/// Resets `Loading` to `Unavailable(Cancelled)` if the acquiring future is
/// dropped before it finishes, so waiters are released and a retry is possible.
struct LoadingGuard<'a> {
    phase: &'a watch::Sender<Phase>,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.phase
                .send_replace(Phase::Unavailable(Arc::new(AcquireError::Cancelled)));
        }
    }
}

/// Owns the lifecycle of the execution module: fetch, instantiate, invoke.
///
/// State lives in a `watch` channel. The acquisition sequence is the only
/// writer; everything else reads a snapshot without waiting.
pub struct ModuleHost {
    source: Box<dyn ModuleSource>,
    fetch_timeout: Duration,
    phase: watch::Sender<Phase>,
}

impl fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHost")
            .field("address", &self.source.address())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl ModuleHost {
    pub fn new(source: impl ModuleSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            phase: watch::Sender::new(Phase::Uninitialized),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(source_for_address(&config.module_url))
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        self.source.address()
    }

    pub fn state(&self) -> HostState {
        self.phase.borrow().state()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.phase.borrow(), Phase::Ready(_))
    }

    /// Fetch and instantiate the module.
    ///
    /// Starts an acquisition only from `Uninitialized` or `Unavailable`.
    /// While another acquisition is in flight this waits for its outcome
    /// instead of starting a second one; once `Ready` it returns at once.
    /// Failures end in `Unavailable` and are never returned as errors.
    pub async fn acquire(&self) -> HostState {
        let mut claimed = false;
        self.phase.send_if_modified(|phase| {
            if matches!(phase, Phase::Uninitialized | Phase::Unavailable(_)) {
                *phase = Phase::Loading;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return self.settled().await;
        }

        let mut guard = LoadingGuard {
            phase: &self.phase,
            armed: true,
        };
        let address = self.source.address();
        info!(address, "acquiring execution module");

        let next = match self.load().await {
            Ok(handle) => {
                info!(address, "execution module ready");
                Phase::Ready(handle)
            }
            Err(e) => {
                warn!(address, error = %e, "execution module unavailable, using simulated execution");
                Phase::Unavailable(Arc::new(e))
            }
        };
        guard.armed = false;
        self.phase.send_replace(next);
        self.state()
    }

    /// Call `entry_point` of the live module with `source`.
    ///
    /// Returns `InvokeError::NotReady` unless the host is `Ready`. A trap
    /// fails only this call; the module stays loaded.
    pub async fn invoke(&self, entry_point: &str, source: &str) -> Result<InvokeOutput, InvokeError> {
        let tx = match &*self.phase.borrow() {
            Phase::Ready(handle) => handle.tx.downgrade(),
            _ => return Err(InvokeError::NotReady),
        };
        debug!(entry_point, len = source.len(), "invoking execution module");
        send_invoke(tx, entry_point.to_string(), source.to_string()).await
    }

    async fn settled(&self) -> HostState {
        let mut rx = self.phase.subscribe();
        let settled = rx
            .wait_for(|phase| !matches!(phase, Phase::Loading))
            .await
            .map(|phase| phase.state());
        settled.unwrap_or_else(|_| self.state())
    }

    async fn load(&self) -> Result<ModuleHandle, AcquireError> {
        let bytes = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))??;
        debug!(bytes = bytes.len(), "fetched execution module");

        let engine = sandbox::engine()?;
        let sandbox = Sandbox::instantiate(&engine, &bytes).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(inbox_loop(sandbox, rx));
        Ok(ModuleHandle { tx })
    }
}
