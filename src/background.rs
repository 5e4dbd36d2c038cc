/// Tracked fire-and-forget work
///
/// Every detached side effect (notification emails) goes through
/// [`BackgroundTasks::spawn`]. Failures and panics are logged and counted,
/// never propagated, and shutdown waits for everything still running.
use crate::{error::ApiResult, metrics};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio_util::task::TaskTracker;

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` detached from the caller
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ApiResult<()>> + Send + 'static,
    {
        metrics::BACKGROUND_TASKS_ACTIVE.inc();

        self.tracker.spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {
                    metrics::record_background_task(name, "ok");
                    tracing::debug!(task = name, "background task finished");
                }
                Ok(Err(e)) => {
                    metrics::record_background_task(name, "error");
                    tracing::error!(task = name, error = %e, "background task failed");
                }
                Err(payload) => {
                    metrics::record_background_task(name, "panic");
                    tracing::error!(
                        task = name,
                        panic = %panic_message(payload.as_ref()),
                        "background task panicked"
                    );
                }
            }
            metrics::BACKGROUND_TASKS_ACTIVE.dec();
        });
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait for every spawned task to finish
    pub async fn shutdown(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "waiting for background tasks");
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("background tasks drained");
    }

    /// Wait for in-flight tasks but keep accepting new ones
    #[cfg(test)]
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
