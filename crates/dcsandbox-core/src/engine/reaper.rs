//! Background reaper
//!
//! Periodically stops running sandboxes that outlived their timeout
//! (timeoutSeconds = 0 means no deadline) and, when auto-cleanup is on,
//! removes stopped/errored sandboxes idle past `cleanup.inactiveTimeout`.

use super::SandboxEngine;
use crate::SandboxStatus;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REAP_INTERVAL: Duration = Duration::from_secs(60);

impl SandboxEngine {
    /// Spawn the reaper task; it runs until `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => engine.reap().await,
                }
            }
        })
    }

    /// One reaper pass
    pub async fn reap(&self) {
        let now = Utc::now();
        let inactive = dcsandbox_config::parse_duration(&self.config.cleanup.inactive_timeout)
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok());

        for record in self.list().await {
            match record.status {
                SandboxStatus::Running => {
                    let overdue = record.deadline().is_some_and(|deadline| now > deadline);
                    if overdue {
                        tracing::info!(sandbox = %record.id, name = %record.name, "sandbox past its timeout, stopping");
                        if let Err(e) = self.stop(&record.id).await {
                            tracing::warn!(sandbox = %record.id, error = %e, "reaper stop failed");
                        }
                    }
                }
                SandboxStatus::Stopped | SandboxStatus::Error => {
                    if !self.config.defaults.auto_cleanup {
                        continue;
                    }
                    if record.named_explicitly && self.config.cleanup.preserve_named {
                        continue;
                    }
                    let expired = inactive
                        .is_some_and(|window| now - record.created_at > window);
                    if expired {
                        tracing::info!(sandbox = %record.id, name = %record.name, "inactive sandbox expired, removing");
                        if let Err(e) = self.remove(&record.id, true).await {
                            tracing::warn!(sandbox = %record.id, error = %e, "reaper remove failed");
                        }
                    }
                }
                SandboxStatus::Creating => {}
            }
        }
    }
}
