use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{NotificationEngine, SweepReport};
use crate::error::NotifyError;

/// Starts the delivery and retry sweeps. Both stop when `shutdown` is cancelled.
pub fn spawn_sweeps(
    engine: Arc<NotificationEngine>,
    delivery_interval: Duration,
    retry_interval: Duration,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let delivery_engine = engine.clone();
    let delivery = tokio::spawn(run_periodic(
        "delivery",
        delivery_interval,
        shutdown.clone(),
        move || {
            let engine = delivery_engine.clone();
            async move { engine.sweep_delivery_status().await }
        },
    ));

    let retry = tokio::spawn(run_periodic(
        "retry",
        retry_interval,
        shutdown,
        move || {
            let engine = engine.clone();
            async move { engine.retry_recent().await }
        },
    ));

    vec![delivery, retry]
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    sweep: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<SweepReport, NotifyError>>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(sweep = name, period_secs = period.as_secs(), "Sweep scheduled");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(sweep = name, "Sweep stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweep().await {
                    error!(sweep = name, error = %e, "Sweep run failed");
                }
            }
        }
    }
}
