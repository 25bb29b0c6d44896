//! Chat command surface, independent of any chat platform.

use crate::{
    composer::{describe_last_found, format_elapsed},
    models::{normalize_pool_id, PoolRecord, PoolStatus},
    store::{FleetSnapshot, PoolStore},
    watchers::{WatchOutcome, WatchRegistry},
};
use std::{fmt::Write, sync::Arc, time::SystemTime};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Heights,
    Height(Option<String>),
    Forked,
    LastFound,
    Watch(Option<String>),
    Unwatch(Option<String>),
}

impl Command {
    /// Commands that only touch the sender's own state.
    fn is_open(&self) -> bool {
        matches!(self, Self::Help | Self::Watch(_) | Self::Unwatch(_))
    }
}

/// Parses `/height@PoolWatchBot pool.example` style messages. Returns `None`
/// for anything that is not a known command.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut words = text.split_whitespace();
    let head = words.next()?;
    let head = head.strip_prefix(['/', '.', '!'])?;
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let argument = words.next().map(str::to_owned);

    match name.as_str() {
        "help" => Some(Command::Help),
        "heights" | "status" => Some(Command::Heights),
        "height" => Some(Command::Height(argument)),
        "forked" => Some(Command::Forked),
        "lastfound" => Some(Command::LastFound),
        "watch" => Some(Command::Watch(argument)),
        "unwatch" => Some(Command::Unwatch(argument)),
        _ => None,
    }
}

/// Who sent a command and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub sender: String,
    pub channel: String,
    pub privileged: bool,
}

pub struct CommandHandler {
    store: Arc<PoolStore>,
    registry: Arc<WatchRegistry>,
    monitor_channel: String,
}

impl CommandHandler {
    pub fn new(store: Arc<PoolStore>, registry: Arc<WatchRegistry>, monitor_channel: String) -> Self {
        Self {
            store,
            registry,
            monitor_channel,
        }
    }

    /// Reply text, or `None` when the message is not a command or the sender
    /// may not run it here.
    pub async fn handle(&self, text: &str, invocation: &Invocation, now: SystemTime) -> Option<String> {
        let command = parse_command(text)?;
        let authorized = invocation.privileged || invocation.channel == self.monitor_channel;
        if !authorized && !command.is_open() {
            return None;
        }

        let reply = match command {
            Command::Help => help_text(),
            Command::Heights => render_status(&self.store.snapshot().await, now),
            Command::Height(None) => {
                let snapshot = self.store.snapshot().await;
                format!("Consensus height: {}", snapshot.network.consensus_height)
            }
            Command::Height(Some(pool)) => render_pool_height(&self.store.snapshot().await, &pool),
            Command::Forked => render_forked(&self.store.snapshot().await, now),
            Command::LastFound => render_last_found(&self.store.snapshot().await, now),
            Command::Watch(None) => "Usage: watch <pool>".to_owned(),
            Command::Unwatch(None) => "Usage: unwatch <pool>".to_owned(),
            Command::Watch(Some(pool)) => {
                let outcome = self.registry.watch(&pool, &invocation.sender).await;
                describe_watch(&pool, outcome)
            }
            Command::Unwatch(Some(pool)) => {
                let outcome = self.registry.unwatch(&pool, &invocation.sender).await;
                describe_watch(&pool, outcome)
            }
        };

        Some(reply)
    }
}

fn describe_watch(
    pool: &str,
    outcome: Result<WatchOutcome, crate::watchers::PersistenceError>,
) -> String {
    let pool = normalize_pool_id(pool);
    match outcome {
        Ok(WatchOutcome::Added) => format!("You will be notified about {pool}."),
        Ok(WatchOutcome::AlreadyWatching) => format!("You are already watching {pool}."),
        Ok(WatchOutcome::Removed) => format!("You will no longer be notified about {pool}."),
        Ok(WatchOutcome::NotWatching) => format!("You are not watching {pool}."),
        Ok(WatchOutcome::UnknownPool) => format!("Unknown pool: {pool}"),
        Err(error) => {
            warn!(pool = %pool, error = %error, "watch change not persisted");
            "Could not save your watch list, please try again later.".to_owned()
        }
    }
}

fn help_text() -> String {
    [
        "help               this message",
        "heights | status   every pool with height and status",
        "height             consensus height",
        "height <pool>      height of one pool",
        "forked             pools with an active issue",
        "lastfound          pools by most recent block found",
        "watch <pool>       get notified when a pool misbehaves",
        "unwatch <pool>     stop notifications for a pool",
    ]
    .join("\n")
}

fn table(pools: &[&PoolRecord], now: SystemTime) -> String {
    let width = pools.iter().map(|pool| pool.url.len()).max().unwrap_or(0);
    let mut text = String::new();
    for pool in pools {
        let height = match pool.status() {
            PoolStatus::Unknown | PoolStatus::Pending => "-".to_owned(),
            _ if pool.last_height == 0 => "-".to_owned(),
            _ => pool.last_height.to_string(),
        };
        let _ = writeln!(
            text,
            "{:<width$}  {:>9}  {:<9}  {}",
            pool.url,
            height,
            pool.status().to_string(),
            describe_last_found(pool.last_block_found_at, now),
        );
    }
    text.trim_end().to_owned()
}

fn render_status(snapshot: &FleetSnapshot, now: SystemTime) -> String {
    if snapshot.pools.is_empty() {
        return "No pools loaded yet.".to_owned();
    }
    let pools: Vec<&PoolRecord> = snapshot.pools.iter().collect();
    format!(
        "Consensus height: {}\n\n{}",
        snapshot.network.consensus_height,
        table(&pools, now)
    )
}

fn render_pool_height(snapshot: &FleetSnapshot, raw_pool: &str) -> String {
    let id = normalize_pool_id(raw_pool);
    let Some(pool) = snapshot.pool(&id) else {
        return format!("Unknown pool: {id}");
    };

    let consensus = snapshot.network.consensus_height;
    match pool.status() {
        PoolStatus::Unknown => format!("{id} uses an unsupported API and is not monitored."),
        PoolStatus::Pending => format!("{id} has not been polled yet."),
        _ if pool.last_height == 0 => format!("{id} is not responding. Consensus height: {consensus}"),
        _ => {
            let difference = i128::from(pool.last_height) - i128::from(consensus);
            format!(
                "{id} height: {} (consensus {consensus}, {difference:+})",
                pool.last_height
            )
        }
    }
}

fn render_forked(snapshot: &FleetSnapshot, now: SystemTime) -> String {
    let affected: Vec<&PoolRecord> = snapshot.pools.iter().filter(|pool| pool.in_bad_state()).collect();
    if affected.is_empty() {
        return "All pools are healthy.".to_owned();
    }

    let mut text = table(&affected, now);
    for pool in &affected {
        if let Some(started) = pool.issue_started_at {
            let _ = write!(text, "\n{} affected for {}", pool.url, format_elapsed(started, now));
        }
    }
    text
}

fn render_last_found(snapshot: &FleetSnapshot, now: SystemTime) -> String {
    if snapshot.pools.is_empty() {
        return "No pools loaded yet.".to_owned();
    }
    let mut pools: Vec<&PoolRecord> = snapshot.pools.iter().collect();
    // Most recent first, pools that never found a block last.
    pools.sort_by(|left, right| right.last_block_found_at.cmp(&left.last_block_found_at));
    table(&pools, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MonitorSettings,
        models::{PoolSample, RosterEntry},
        watchers::WatchFile,
    };
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn at(second: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(second)
    }

    fn member(channel: &str) -> Invocation {
        Invocation {
            sender: "@alice".to_owned(),
            channel: channel.to_owned(),
            privileged: false,
        }
    }

    async fn handler(dir: &TempDir) -> CommandHandler {
        let store = Arc::new(PoolStore::new(at(0)));
        let _ = store
            .merge_roster(vec![
                RosterEntry::new("alpha.pool", "https://alpha.pool/api", "forknote"),
                RosterEntry::new("beta.pool", "https://beta.pool/api", "forknote"),
                RosterEntry::new("odd.pool", "https://odd.pool/api", "mystery"),
            ])
            .await;
        let fetches = vec![
            (
                "alpha.pool".to_owned(),
                Ok(PoolSample {
                    height: 100,
                    last_block_found_at: Some(at(0)),
                }),
            ),
            (
                "beta.pool".to_owned(),
                Ok(PoolSample {
                    height: 100,
                    last_block_found_at: Some(at(50)),
                }),
            ),
        ];
        let _ = store.apply_cycle(fetches, &MonitorSettings::default(), at(60)).await;

        let registry = Arc::new(WatchRegistry::new(
            store.clone(),
            WatchFile::new(dir.path().join("watchers.txt")),
        ));
        CommandHandler::new(store, registry, "monitor".to_owned())
    }

    #[test]
    fn parses_prefixes_and_bot_suffix() {
        assert_eq!(parse_command("/heights"), Some(Command::Heights));
        assert_eq!(parse_command(".status"), Some(Command::Heights));
        assert_eq!(
            parse_command("/height@PoolWatchBot https://alpha.pool/"),
            Some(Command::Height(Some("https://alpha.pool/".to_owned())))
        );
        assert_eq!(parse_command("!watch"), Some(Command::Watch(None)));
        assert_eq!(parse_command("heights"), None);
        assert_eq!(parse_command("/dance"), None);
        assert_eq!(parse_command(""), None);
    }

    #[tokio::test]
    async fn restricted_commands_are_silently_ignored_elsewhere() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let handler = handler(&dir).await;

        assert_eq!(handler.handle("/heights", &member("random-chat"), at(60)).await, None);
        assert!(handler.handle("/help", &member("random-chat"), at(60)).await.is_some());

        let privileged = Invocation {
            privileged: true,
            ..member("random-chat")
        };
        assert!(handler.handle("/heights", &privileged, at(60)).await.is_some());
    }

    #[tokio::test]
    async fn height_queries_report_consensus_and_pool() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let handler = handler(&dir).await;

        assert_eq!(
            handler.handle("/height", &member("monitor"), at(60)).await,
            Some("Consensus height: 100".to_owned())
        );
        assert_eq!(
            handler.handle("/height https://alpha.pool", &member("monitor"), at(60)).await,
            Some("alpha.pool height: 100 (consensus 100, +0)".to_owned())
        );
        assert_eq!(
            handler.handle("/height nowhere.pool", &member("monitor"), at(60)).await,
            Some("Unknown pool: nowhere.pool".to_owned())
        );
    }

    #[tokio::test]
    async fn status_lists_unknown_dialect_pools() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let handler = handler(&dir).await;

        let reply = handler.handle("/status", &member("monitor"), at(60)).await.unwrap_or_default();

        assert!(reply.contains("odd.pool"));
        assert!(reply.contains("Unknown"));
        assert_eq!(
            handler.handle("/forked", &member("monitor"), at(60)).await,
            Some("All pools are healthy.".to_owned())
        );
    }

    #[tokio::test]
    async fn lastfound_orders_most_recent_first() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let handler = handler(&dir).await;

        let reply = handler.handle("/lastfound", &member("monitor"), at(60)).await.unwrap_or_default();
        let beta = reply.find("beta.pool");
        let alpha = reply.find("alpha.pool");
        let odd = reply.find("odd.pool");

        assert!(beta.is_some() && beta < alpha && alpha < odd);
    }

    #[tokio::test]
    async fn watch_flow_reports_each_outcome() {
        let Ok(dir) = TempDir::new() else {
            return;
        };
        let handler = handler(&dir).await;
        let anywhere = member("dm");

        assert_eq!(
            handler.handle("/watch alpha.pool", &anywhere, at(60)).await,
            Some("You will be notified about alpha.pool.".to_owned())
        );
        assert_eq!(
            handler.handle("/watch alpha.pool", &anywhere, at(60)).await,
            Some("You are already watching alpha.pool.".to_owned())
        );
        assert_eq!(
            handler.handle("/unwatch beta.pool", &anywhere, at(60)).await,
            Some("You are not watching beta.pool.".to_owned())
        );
        assert_eq!(
            handler.handle("/unwatch alpha.pool", &anywhere, at(60)).await,
            Some("You will no longer be notified about alpha.pool.".to_owned())
        );
    }
}
