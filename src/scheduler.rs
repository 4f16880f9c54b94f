//! Cron-driven access session refresh.
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenService;

/// Calls [`TokenService::refresh`] on every fire time of a cron schedule.
pub struct RefreshScheduler {
    schedule: cron::Schedule,
    tokens: Arc<TokenService>,
}

impl RefreshScheduler {
    pub fn new(schedule: cron::Schedule, tokens: Arc<TokenService>) -> Self {
        Self { schedule, tokens }
    }

    /// Run one refresh. Failures are logged and left for the next tick; the
    /// previously published session stays in place.
    pub async fn tick(&self) {
        info!("[Scheduler] Running session job");
        if let Err(e) = self.tokens.refresh().await {
            if e.is_fatal() {
                error!("[Scheduler] Session refresh cannot succeed until reconfigured: {}", e);
            } else {
                warn!("[Scheduler] Session refresh failed, retrying next tick: {}", e);
            }
        }
    }

    /// Spawn the refresh loop until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!("[Scheduler] Schedule has no further fire times, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!("[Scheduler] Next session refresh at {}", next);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Scheduler] Stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => self.tick().await,
            }
        }
    }
}
