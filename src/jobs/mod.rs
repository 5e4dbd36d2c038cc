use crate::{context::AppContext, error::ApiResult, metrics};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub mod tasks;

/// Job scheduler for periodic maintenance
pub struct JobScheduler {
    context: Arc<AppContext>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start all background jobs
    pub fn start(self: &Arc<Self>) {
        info!("Starting background job scheduler");

        // Every hour
        self.every("token_cleanup", Duration::from_secs(3600), |ctx| async move {
            tasks::cleanup_expired_tokens(&ctx).await
        });
        // Every minute
        self.every("rate_limiter_prune", Duration::from_secs(60), |ctx| async move {
            tasks::prune_rate_limiter(&ctx).await
        });
        // Every 5 minutes
        self.every("health_check", Duration::from_secs(300), |ctx| async move {
            tasks::health_check(&ctx).await
        });

        info!("Background jobs started");
    }

    /// Run `job` every `period` until [`JobScheduler::stop`]
    fn every<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, job: F)
    where
        F: Fn(Arc<AppContext>) -> Fut + Send + 'static,
        Fut: Future<Output = ApiResult<u64>> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let started = Instant::now();
                match job(Arc::clone(&context)).await {
                    Ok(count) => {
                        metrics::record_background_job(name, "success", started.elapsed().as_secs_f64());
                        if count > 0 {
                            debug!(job = name, count, "job finished");
                        }
                    }
                    Err(e) => {
                        metrics::record_background_job(name, "failure", started.elapsed().as_secs_f64());
                        error!(job = name, error = %e, "job failed");
                    }
                }
            }
            debug!(job = name, "job stopped");
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.push(handle);
        }
    }

    /// Signal every job to stop and wait for the loops to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "job loop ended abnormally");
            }
        }
        info!("Background jobs stopped");
    }
}
