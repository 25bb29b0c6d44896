use std::{collections::BTreeSet, env, path::PathBuf, time::Duration};
use thiserror::Error;

pub const DEFAULT_ROSTER_URL: &str =
    "https://raw.githubusercontent.com/turtlecoin/turtlecoin-pools-json/master/v2/turtlecoin-pools.json";

/// Thresholds driving the consensus, issue and stuck-network logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub max_height_difference: u64,
    pub api_failure_threshold: u32,
    pub stuck_after: Duration,
    /// Whether pools reporting height 0 take part in the consensus mode.
    pub include_down_pools_in_consensus: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_height_difference: 5,
            api_failure_threshold: 3,
            stuck_after: Duration::from_secs(5 * 60),
            include_down_pools_in_consensus: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub roster_url: String,
    pub watch_file: PathBuf,
    pub telegram_bot_token: String,
    pub telegram_chat_id: i64,
    pub admin_ids: BTreeSet<u64>,
    pub poll_interval: Duration,
    pub roster_refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub monitor: MonitorSettings,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing env var: {0}")]
    MissingEnv(String),
    #[error("invalid value in env var {name}: {value:?}")]
    Invalid { name: String, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = MonitorSettings::default();

        let roster_url = lookup("POOL_WATCH_ROSTER_URL").unwrap_or_else(|| DEFAULT_ROSTER_URL.to_owned());
        let watch_file = PathBuf::from(
            lookup("POOL_WATCH_WATCH_FILE").unwrap_or_else(|| "watchers.txt".to_owned()),
        );
        let telegram_bot_token = read_required(&lookup, "POOL_WATCH_TELEGRAM_BOT_TOKEN")?;
        let telegram_chat_id = parse_value(
            "POOL_WATCH_TELEGRAM_CHAT_ID",
            read_required(&lookup, "POOL_WATCH_TELEGRAM_CHAT_ID")?,
        )?;

        let admin_ids = match lookup("POOL_WATCH_ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| parse_value("POOL_WATCH_ADMIN_IDS", id.to_owned()))
                .collect::<Result<BTreeSet<u64>, _>>()?,
            None => BTreeSet::new(),
        };

        let poll_seconds = read_or(&lookup, "POOL_WATCH_POLL_SECONDS", 30u64)?;
        let roster_seconds = read_or(&lookup, "POOL_WATCH_ROSTER_REFRESH_SECONDS", 3600u64)?;
        let timeout_seconds = read_or(&lookup, "POOL_WATCH_FETCH_TIMEOUT_SECONDS", 8u64)?;
        let stuck_minutes = read_or(
            &lookup,
            "POOL_WATCH_STUCK_MINUTES",
            defaults.stuck_after.as_secs() / 60,
        )?;

        let monitor = MonitorSettings {
            max_height_difference: read_or(
                &lookup,
                "POOL_WATCH_MAX_HEIGHT_DIFFERENCE",
                defaults.max_height_difference,
            )?,
            api_failure_threshold: read_or(
                &lookup,
                "POOL_WATCH_API_FAILURE_THRESHOLD",
                defaults.api_failure_threshold,
            )?,
            stuck_after: Duration::from_secs(stuck_minutes.saturating_mul(60)),
            include_down_pools_in_consensus: read_or(
                &lookup,
                "POOL_WATCH_CONSENSUS_INCLUDE_DOWN",
                defaults.include_down_pools_in_consensus,
            )?,
        };

        if poll_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "POOL_WATCH_POLL_SECONDS".to_owned(),
                value: "0".to_owned(),
            });
        }
        if roster_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "POOL_WATCH_ROSTER_REFRESH_SECONDS".to_owned(),
                value: "0".to_owned(),
            });
        }

        Ok(Self {
            roster_url,
            watch_file,
            telegram_bot_token,
            telegram_chat_id,
            admin_ids,
            poll_interval: Duration::from_secs(poll_seconds),
            roster_refresh_interval: Duration::from_secs(roster_seconds),
            fetch_timeout: Duration::from_secs(timeout_seconds),
            monitor,
        })
    }
}

fn read_required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, ConfigError> {
    lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_owned()))
}

fn read_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => parse_value(name, raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name: name.to_owned(),
        value: raw,
    })
}
