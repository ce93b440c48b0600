//! Background sweeper for stuck evaluations and expired metrics.
//!
//! Runs on a fixed interval: evaluations that have been running longer than
//! the configured timeout are failed through the same serialized transition
//! path every other writer uses, so a completion racing the sweeper still
//! has exactly one winner. Each pass also enforces metrics retention.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EvalHubConfig;
use crate::error::{Error, Result};
use crate::evaluation::Transition;
use crate::service::EvalHub;

/// What one sweeper pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Evaluations failed for exceeding the timeout.
    pub timed_out: usize,
    /// Metric rollups purged past retention.
    pub metrics_purged: usize,
}

/// Periodically fails overdue evaluations and purges expired metrics.
pub struct TimeoutSweeper {
    hub: Arc<EvalHub>,
    config: EvalHubConfig,
    shutdown: Arc<AtomicBool>,
}

impl TimeoutSweeper {
    /// Create a sweeper over the given service.
    #[must_use]
    pub fn new(hub: Arc<EvalHub>, config: EvalHubConfig) -> Self {
        Self {
            hub,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop on the runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let hub = Arc::clone(&self.hub);
        let config = self.config.clone();
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            info!(
                interval_secs = config.sweep_interval.as_secs(),
                timeout_secs = config.evaluation_timeout.as_secs(),
                "timeout sweeper started"
            );
            loop {
                tokio::time::sleep(config.sweep_interval).await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match sweep(&hub, &config).await {
                    Ok(stats) if stats != SweepStats::default() => {
                        info!(
                            timed_out = stats.timed_out,
                            metrics_purged = stats.metrics_purged,
                            "sweep pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "sweep pass failed");
                    }
                }
            }
            info!("timeout sweeper stopped");
        })
    }

    /// Ask the sweep loop to exit after its current pass.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run a single pass immediately.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        sweep(&self.hub, &self.config).await
    }
}

/// One sweep pass: fail overdue running evaluations, purge expired metrics.
pub async fn sweep(hub: &EvalHub, config: &EvalHubConfig) -> Result<SweepStats> {
    let now = Utc::now();
    let timeout = chrono::Duration::from_std(config.evaluation_timeout)
        .unwrap_or_else(|_| chrono::Duration::MAX);
    let message = format!(
        "evaluation timed out after {}s",
        config.evaluation_timeout.as_secs()
    );

    let mut stats = SweepStats::default();
    for evaluation in hub.list_running_evaluations().await? {
        let Some(started_at) = evaluation.started_at else {
            continue;
        };
        if now.signed_duration_since(started_at) < timeout {
            continue;
        }
        let transition = Transition::Fail {
            error: message.clone(),
        };
        match hub
            .update_status(evaluation.usecase_id, evaluation.id, transition)
            .await
        {
            Ok(_) => {
                warn!(
                    evaluation_id = %evaluation.id,
                    usecase_id = %evaluation.usecase_id,
                    "failed overdue evaluation"
                );
                stats.timed_out += 1;
            }
            // The evaluation reached a terminal state while we were
            // sweeping; nothing to do.
            Err(Error::InvalidTransition { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    stats.metrics_purged = hub.purge_expired_metrics(now).await?;
    Ok(stats)
}
