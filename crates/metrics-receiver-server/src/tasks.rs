// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background tasks for internal self-metrics.

use crate::AppState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Spawn the collect and flush loops. Both stop when `shutdown` turns true.
pub fn spawn_internal_metrics(
    state: Arc<AppState>,
    collect_every: Duration,
    flush_every: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let collect_state = Arc::clone(&state);
    let collect = tokio::spawn(every(collect_every, shutdown.clone(), move || {
        let state = Arc::clone(&collect_state);
        async move {
            state.receiver.metrics().collect(Utc::now());
            debug!("Collected internal metrics");
        }
    }));

    let flush = tokio::spawn(every(flush_every, shutdown, move || {
        let state = Arc::clone(&state);
        async move {
            match state.receiver.flush_internal_metrics().await {
                Ok(report) if report.points == 0 => {}
                Ok(report) => debug!(
                    "Sent {} internal metric points ({} non-critical errors)",
                    report.points,
                    report.non_critical.len()
                ),
                Err(failure) => error!("Critical error writing internal metrics: {}", failure),
            }
        }
    }));

    info!(
        "Internal metrics: collect every {:?}, flush every {:?}",
        collect_every, flush_every
    );
    vec![collect, flush]
}

/// Run `tick` every `period`, first after one period, until shutdown.
async fn every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => tick().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
