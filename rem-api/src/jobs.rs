//! Compaction background job
//!
//! Cron-like driver for the moment builder: periodically sweeps sessions
//! with recent message activity and runs compaction for each. Per-session
//! advisory locks inside the builder coalesce overlap with on-demand runs.
//! Failures are logged and the job keeps ticking; they never terminate the
//! process.

use std::time::Duration;

use rem_agents::AgentContext;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::AppState;

/// Configuration for the compaction sweep.
#[derive(Debug, Clone)]
pub struct CompactionJobConfig {
    pub enabled: bool,
    /// Sweep cadence.
    pub check_interval: Duration,
    /// How far back to look for active sessions.
    pub activity_window: Duration,
    /// Maximum sessions compacted per sweep.
    pub batch_size: i64,
}

impl Default for CompactionJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(300),
            activity_window: Duration::from_secs(3600),
            batch_size: 20,
        }
    }
}

impl CompactionJobConfig {
    /// Environment variables:
    /// - `REM_COMPACTION_ENABLED` (default true)
    /// - `REM_COMPACTION_INTERVAL_SECS` (default 300)
    /// - `REM_COMPACTION_ACTIVITY_WINDOW_SECS` (default 3600)
    /// - `REM_COMPACTION_BATCH_SIZE` (default 20)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("REM_COMPACTION_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.enabled),
            check_interval: std::env::var("REM_COMPACTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.check_interval),
            activity_window: std::env::var("REM_COMPACTION_ACTIVITY_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_window),
            batch_size: std::env::var("REM_COMPACTION_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
        }
    }
}

/// Spawn the compaction sweep. Send `true` on the returned channel to stop.
pub fn spawn_compaction_job(
    state: AppState,
    config: CompactionJobConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("compaction job disabled");
            return;
        }
        let mut ticker = interval(config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = config.check_interval.as_secs(),
            "compaction job started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep(&state, &config).await {
                        tracing::error!(error = %e, "compaction sweep failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("compaction job stopping");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

/// One sweep: find recently active sessions and run the builder for each.
async fn sweep(state: &AppState, config: &CompactionJobConfig) -> rem_core::RemResult<()> {
    let window_secs = config.activity_window.as_secs_f64();
    let rows = state
        .db
        .query(
            "SELECT DISTINCT tenant_id, user_id, session_id FROM messages \
             WHERE deleted_at IS NULL \
               AND session_id IS NOT NULL AND user_id IS NOT NULL \
               AND created_at > NOW() - make_interval(secs => $1) \
             LIMIT $2",
            &[&window_secs, &config.batch_size],
        )
        .await?;

    for row in rows {
        let tenant_id: String = row.get(0);
        let user_id: String = row.get(1);
        let session_id: String = row.get(2);

        let context = AgentContext {
            user_id: Some(user_id.clone()),
            tenant_id,
            session_id: Some(session_id.clone()),
            model: None,
            agent_schema: None,
        };
        let result = state
            .moment_builder(&context)
            .run(&session_id, &user_id)
            .await;
        if !result.success {
            tracing::warn!(
                session_id,
                error = ?result.error,
                "background compaction failed"
            );
        } else if result.moments_created > 0 {
            tracing::info!(
                session_id,
                moments = result.moments_created,
                "background compaction completed"
            );
        }
    }
    Ok(())
}
