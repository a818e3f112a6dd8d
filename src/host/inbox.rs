use tokio::sync::mpsc;

use super::channel::InvokeTask;
use super::sandbox::Sandbox;

/// Serve invocations until every sender is gone, then drop the sandbox.
///
/// Tasks are handled strictly in arrival order; the store is never shared.
pub(super) async fn inbox_loop(mut sandbox: Sandbox, mut rx: mpsc::UnboundedReceiver<InvokeTask>) {
    let mut batch = Vec::new();
    while rx.recv_many(&mut batch, usize::MAX).await > 0 {
        for task in batch.drain(..) {
            let result = sandbox.invoke(&task.entry_point, &task.source).await;
            if let Err(e) = &result {
                tracing::debug!(entry_point = %task.entry_point, error = %e, "invocation failed");
            }
            // The caller may have stopped waiting.
            let _ = task.reply.send(result);
        }
    }
    drop(sandbox);
    tracing::debug!("execution module released");
}
