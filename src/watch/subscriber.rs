//! Subscriber callbacks and failure-isolated dispatch

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::error;

use crate::model::ChangeEvent;

/// Synchronous callback, run inline on the emitting thread.
pub type SyncCallback = Arc<dyn Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Asynchronous callback; its future is spawned, never awaited inline.
pub type AsyncCallback =
    Arc<dyn Fn(ChangeEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

#[derive(Clone)]
pub(crate) enum Subscriber {
    Sync(SyncCallback),
    Async { callback: AsyncCallback, runtime: Handle },
}

impl Subscriber {
    /// Hand `event` to the callback. Errors and panics are logged and
    /// swallowed so the next subscriber still runs.
    pub(crate) fn deliver(&self, id: SubscriptionId, event: &ChangeEvent) {
        match self {
            Self::Sync(callback) => match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    subscriber = id.0,
                    event = event.event_type.as_str(),
                    experiment = %event.experiment_id,
                    error = %e,
                    "Change callback failed"
                ),
                Err(_) => error!(subscriber = id.0, "Change callback panicked"),
            },
            Self::Async { callback, runtime } => {
                let future = match catch_unwind(AssertUnwindSafe(|| callback(event.clone()))) {
                    Ok(future) => future,
                    Err(_) => {
                        error!(subscriber = id.0, "Async change callback panicked");
                        return;
                    }
                };
                let experiment = event.experiment_id.clone();
                runtime.spawn(async move {
                    if let Err(e) = future.await {
                        error!(subscriber = id.0, experiment = %experiment, error = %e, "Async change callback failed");
                    }
                });
            }
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Subscriber::Sync"),
            Self::Async { .. } => f.write_str("Subscriber::Async"),
        }
    }
}
