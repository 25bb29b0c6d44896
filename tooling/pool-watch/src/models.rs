use std::{collections::BTreeSet, fmt, str::FromStr, time::SystemTime};
use thiserror::Error;

/// Response format spoken by a pool's stats API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Forknote,
    NodeService,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pool dialect: {0}")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "forknote" => Ok(Self::Forknote),
            "node.js" | "nodejs" | "node-service" | "nodeService" => Ok(Self::NodeService),
            other => Err(UnknownDialect(other.to_owned())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forknote => write!(f, "forknote"),
            Self::NodeService => write!(f, "node.js"),
        }
    }
}

/// Strips the scheme and trailing slashes so that `https://pool.example/`
/// and `pool.example` name the same pool.
pub fn normalize_pool_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    without_scheme.trim_end_matches('/').to_owned()
}

/// One pool as listed by the upstream roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub url: String,
    pub api_base: String,
    pub dialect: Result<Dialect, UnknownDialect>,
}

impl RosterEntry {
    pub fn new(url: &str, api_base: &str, dialect_tag: &str) -> Self {
        Self {
            url: normalize_pool_id(url),
            api_base: api_base.trim().to_owned(),
            dialect: dialect_tag.parse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRecord {
    pub url: String,
    pub api_base: String,
    /// `None` when the roster named a dialect we cannot speak; such pools are
    /// listed but never polled.
    pub dialect: Option<Dialect>,
    pub watchers: BTreeSet<String>,
    /// 0 means unknown or down.
    pub last_height: u64,
    pub last_block_found_at: Option<SystemTime>,
    pub api_fail_streak: u32,
    pub api_alert_active: bool,
    pub height_alert_active: bool,
    pub mentioned_this_episode: bool,
    pub just_recovered: bool,
    pub issue_started_at: Option<SystemTime>,
    /// Set after the first completed poll of this pool.
    pub polled: bool,
}

impl PoolRecord {
    pub fn from_roster(entry: &RosterEntry) -> Self {
        Self {
            url: entry.url.clone(),
            api_base: entry.api_base.clone(),
            dialect: entry.dialect.clone().ok(),
            watchers: BTreeSet::new(),
            last_height: 0,
            last_block_found_at: None,
            api_fail_streak: 0,
            api_alert_active: false,
            height_alert_active: false,
            mentioned_this_episode: false,
            just_recovered: false,
            issue_started_at: None,
            polled: false,
        }
    }

    pub fn in_bad_state(&self) -> bool {
        self.api_alert_active || self.height_alert_active
    }

    /// A raised issue or a recovery that watchers have not been told about.
    pub fn awaiting_announcement(&self) -> bool {
        self.just_recovered || (self.in_bad_state() && !self.mentioned_this_episode)
    }

    /// Records that the pool's current state reached its watchers.
    pub fn mark_announced(&mut self) {
        self.just_recovered = false;
        self.mentioned_this_episode = true;
    }

    pub fn status(&self) -> PoolStatus {
        if self.dialect.is_none() {
            PoolStatus::Unknown
        } else if self.api_alert_active {
            PoolStatus::ApiDown
        } else if self.height_alert_active {
            PoolStatus::Forked
        } else if self.just_recovered {
            PoolStatus::Recovered
        } else if !self.polled {
            PoolStatus::Pending
        } else {
            PoolStatus::Ok
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Ok,
    Pending,
    Unknown,
    ApiDown,
    Forked,
    Recovered,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ok => "Ok",
            Self::Pending => "Pending",
            Self::Unknown => "Unknown",
            Self::ApiDown => "Api Down",
            Self::Forked => "Forked",
            Self::Recovered => "Recovered",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
    pub consensus_height: u64,
    pub consensus_changed_at: SystemTime,
    pub network_stuck_alert_active: bool,
}

impl NetworkState {
    pub fn new(started_at: SystemTime) -> Self {
        Self {
            consensus_height: 0,
            consensus_changed_at: started_at,
            network_stuck_alert_active: false,
        }
    }
}

/// Result of a successful stats fetch for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSample {
    pub height: u64,
    pub last_block_found_at: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_and_trailing_slash() {
        assert_eq!(normalize_pool_id("https://pool.example/"), "pool.example");
        assert_eq!(normalize_pool_id("http://pool.example:8080//"), "pool.example:8080");
        assert_eq!(normalize_pool_id(" pool.example "), "pool.example");
    }

    #[test]
    fn parses_dialect_aliases() {
        assert_eq!("forknote".parse::<Dialect>(), Ok(Dialect::Forknote));
        assert_eq!("node.js".parse::<Dialect>(), Ok(Dialect::NodeService));
        assert_eq!("nodeService".parse::<Dialect>(), Ok(Dialect::NodeService));
        assert_eq!(
            "cryptonote-universal".parse::<Dialect>(),
            Err(UnknownDialect("cryptonote-universal".to_owned()))
        );
    }

    #[test]
    fn unknown_dialect_pool_reports_unknown_status() {
        let entry = RosterEntry::new("https://odd.pool/", "https://odd.pool/api", "mystery");
        let record = PoolRecord::from_roster(&entry);

        assert_eq!(record.url, "odd.pool");
        assert!(record.dialect.is_none());
        assert_eq!(record.status(), PoolStatus::Unknown);
    }
}
