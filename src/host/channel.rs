use tokio::sync::{mpsc, oneshot};

use crate::error::InvokeError;

use super::InvokeOutput;

/// Reply channel for a single invocation.
pub(super) type ReplyTx = oneshot::Sender<Result<InvokeOutput, InvokeError>>;

/// One execution request sent to the task that owns the sandbox.
///
/// Carries owned copies of the entry point and source so nothing borrowed
/// from the caller crosses into the sandbox task.
pub(super) struct InvokeTask {
    pub entry_point: String,
    pub source: String,
    pub reply: ReplyTx,
}

// ---------------------------------------------------------------------------
// Error conversions (channel internals → InvokeError)
// ---------------------------------------------------------------------------

impl From<mpsc::error::SendError<InvokeTask>> for InvokeError {
    fn from(_: mpsc::error::SendError<InvokeTask>) -> Self {
        Self::Unavailable
    }
}

impl From<oneshot::error::RecvError> for InvokeError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Unavailable
    }
}

/// Send an invocation through the channel and await the reply.
///
/// Takes a weak sender: only the host's `ModuleHandle` keeps the sandbox
/// task alive.
pub(super) async fn send_invoke(
    tx: mpsc::WeakUnboundedSender<InvokeTask>,
    entry_point: String,
    source: String,
) -> Result<InvokeOutput, InvokeError> {
    let tx = tx.upgrade().ok_or(InvokeError::Unavailable)?;
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(InvokeTask {
        entry_point,
        source,
        reply: reply_tx,
    })?;
    drop(tx);
    reply_rx.await?
}
