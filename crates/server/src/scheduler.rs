//! Periodic background jobs: tier upload, expiration and statistics refresh.

use crate::state::AppState;
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Run `job` every `period`. The first run happens immediately when
/// `run_at_start` is set, otherwise after one full period. A run that
/// overlaps the next tick delays it instead of queueing a burst.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    run_at_start: bool,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = if run_at_start {
            tokio::time::interval(period)
        } else {
            tokio::time::interval_at(Instant::now() + period, period)
        };
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(job = name, interval_secs = period.as_secs(), "background job scheduled");

        loop {
            ticker.tick().await;
            tracing::debug!(job = name, "background job starting");
            job().await;
        }
    })
}

/// Start the three background jobs. They share only the stores held by
/// `state`.
pub fn spawn_background_jobs(state: &AppState) -> Vec<JoinHandle<()>> {
    let tiering = &state.config.tiering;
    let mut handles = Vec::with_capacity(3);

    if tiering.upload_enabled {
        let tiers = state.tiers.clone();
        handles.push(spawn_periodic(
            "upload",
            tiering.upload_interval(),
            tiering.run_at_startup,
            move || {
                let tiers = tiers.clone();
                async move {
                    if let Err(e) = tiers.upload_sweep().await {
                        tracing::error!(error = %e, "upload sweep failed");
                    }
                }
            },
        ));
    } else {
        tracing::info!("tier upload disabled");
    }

    let tiers = state.tiers.clone();
    handles.push(spawn_periodic(
        "expire",
        tiering.expire_interval(),
        tiering.run_at_startup,
        move || {
            let tiers = tiers.clone();
            async move {
                if let Err(e) = tiers.expire_sweep(OffsetDateTime::now_utc()).await {
                    tracing::error!(error = %e, "expiration sweep failed");
                }
            }
        },
    ));

    // Statistics always start immediately so the first snapshot is not empty
    // for a whole interval.
    let publisher = state.stats_publisher.clone();
    handles.push(spawn_periodic(
        "stats",
        tiering.stats_interval(),
        true,
        move || {
            let publisher = publisher.clone();
            async move {
                if let Err(e) = publisher.refresh().await {
                    tracing::warn!(error = %e, "statistics refresh failed");
                }
            }
        },
    ));

    handles
}
