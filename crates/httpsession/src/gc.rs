//! Background garbage-collection driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::store::Store;

/// Handle to a running GC loop.
///
/// Dropping the handle stops the loop after its current sweep; use
/// [`shutdown`](GcTask::shutdown) to also wait for it to finish.
#[derive(Debug)]
pub struct GcTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl GcTask {
    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(error = %e, "Session GC task panicked");
        }
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a loop calling [`Store::gc`] every `interval` on the current tokio
/// runtime. The first sweep happens one interval after spawning.
pub fn spawn_gc(store: Arc<dyn Store>, interval: Duration) -> Result<GcTask> {
    if interval.is_zero() {
        return Err(Error::InvalidConfig(
            "GC interval must be greater than zero".into(),
        ));
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Session GC stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = store.gc();
                    trace!(removed, "Session GC tick");
                }
            }
        }
    });

    info!(interval_ms = interval.as_millis() as u64, "Session GC started");

    Ok(GcTask {
        cancel,
        handle: Some(handle),
    })
}
