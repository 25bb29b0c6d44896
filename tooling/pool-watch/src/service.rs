use crate::{
    alerter::Notifier,
    config::MonitorSettings,
    fetcher::{HeightFetcher, StatsSource},
    roster::{RosterError, RosterProvider},
    store::{CycleOutcome, MergeSummary, PoolStore},
};
use futures::future::join_all;
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

/// Fetches every pollable pool concurrently, then applies the results to the
/// store in one critical section. Returns the number of messages sent.
pub async fn run_poll_cycle<S: StatsSource>(
    store: &PoolStore,
    fetcher: &HeightFetcher<S>,
    notifier: &impl Notifier,
    settings: &MonitorSettings,
    now: SystemTime,
) -> usize {
    let targets = store.fetch_targets().await;
    let results = join_all(targets.iter().map(|target| fetcher.fetch(target))).await;
    let fetches = targets
        .into_iter()
        .map(|target| target.pool)
        .zip(results)
        .collect();

    let outcome = store.apply_cycle(fetches, settings, now).await;
    deliver(store, notifier, &outcome).await
}

async fn deliver(store: &PoolStore, notifier: &impl Notifier, outcome: &CycleOutcome) -> usize {
    let mut sent_count = 0;

    if let Some(alert) = &outcome.network_alert {
        match notifier.send_network_alert(alert).await {
            Ok(()) => sent_count += 1,
            Err(error) => warn!(error = %error, "failed to send network alert"),
        }
    }

    if let Some(report) = &outcome.report {
        match notifier.send_report(report).await {
            Ok(()) => {
                sent_count += 1;
                store.mark_announced(&report.announced).await;
                info!(
                    changed = report.changed.len(),
                    ongoing = report.ongoing.len(),
                    mentions = report.mentions.len(),
                    "pool report sent"
                );
            }
            Err(error) => warn!(error = %error, "failed to send pool report, retrying next cycle"),
        }
    }

    sent_count
}

/// Downloads the roster and merges it. On failure the current roster stays.
pub async fn refresh_roster(
    store: &PoolStore,
    provider: &impl RosterProvider,
) -> Result<MergeSummary, RosterError> {
    let entries = provider.fetch_roster().await?;
    let summary = store.merge_roster(entries).await;
    info!(
        added = summary.added,
        removed = summary.removed,
        retained = summary.retained,
        "roster merged"
    );
    Ok(summary)
}

pub async fn poll_loop<S: StatsSource, N: Notifier>(
    store: Arc<PoolStore>,
    fetcher: HeightFetcher<S>,
    notifier: N,
    settings: MonitorSettings,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_poll_cycle(&store, &fetcher, &notifier, &settings, SystemTime::now()).await;
    }
}

/// Re-downloads the roster every `interval`. While the fleet is empty, as
/// after a failed startup download, it retries every `retry_interval`.
pub async fn roster_loop(
    store: Arc<PoolStore>,
    provider: impl RosterProvider,
    interval: Duration,
    retry_interval: Duration,
) {
    loop {
        let wait = if store.pool_count().await == 0 {
            retry_interval
        } else {
            interval
        };
        time::sleep(wait).await;

        if let Err(error) = refresh_roster(&store, &provider).await {
            warn!(error = %error, "roster refresh failed, keeping current roster");
        }
    }
}
