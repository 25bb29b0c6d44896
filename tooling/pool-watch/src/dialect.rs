//! Per-dialect knowledge of where a pool publishes its stats and how to pull
//! the height and last-found-block time out of the response text.
//!
//! Extraction is pattern based rather than strict JSON decoding: pool
//! software in the wild wraps these fields in varying and occasionally
//! non-conforming documents.

use crate::models::Dialect;
use regex::Regex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Where the last-found-block time is published and in which unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

/// A missing field yields `None`. A present field with a zero timestamp
/// yields `Some(None)` (the pool never found a block).
pub type LastBlockField = Option<Option<SystemTime>>;

pub trait StatsDialect: Send + Sync {
    /// Path, relative to the API base, that carries the height.
    fn height_path(&self) -> &'static str;

    /// Path, relative to the API base, that carries the last-found-block time.
    /// May equal [`StatsDialect::height_path`], in which case one request serves both.
    fn last_block_path(&self) -> &'static str;

    fn extract_height(&self, body: &str) -> Option<u64>;

    fn extract_last_block_time(&self, body: &str) -> LastBlockField;
}

/// Classic forknote pool API: everything under `<api>/stats`.
#[derive(Debug, Clone)]
pub struct Forknote {
    height: Regex,
    last_block: Regex,
}

impl Forknote {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            height: Regex::new(r#""network"\s*:\s*\{[^{}]*?"height"\s*:\s*"?(\d+)"#)?,
            last_block: Regex::new(r#""lastBlockFound"\s*:\s*"?(\d+)"#)?,
        })
    }
}

impl StatsDialect for Forknote {
    fn height_path(&self) -> &'static str {
        "stats"
    }

    fn last_block_path(&self) -> &'static str {
        "stats"
    }

    fn extract_height(&self, body: &str) -> Option<u64> {
        capture_u64(&self.height, body)
    }

    fn extract_last_block_time(&self, body: &str) -> LastBlockField {
        capture_u64(&self.last_block, body).map(|raw| to_timestamp(raw, TimeUnit::Milliseconds))
    }
}

/// nodejs-pool style API split over `<api>/network/stats` and `<api>/pool/stats`.
#[derive(Debug, Clone)]
pub struct NodeService {
    height: Regex,
    last_block: Regex,
}

impl NodeService {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            height: Regex::new(r#""height"\s*:\s*"?(\d+)"#)?,
            last_block: Regex::new(r#""lastBlockFoundTime"\s*:\s*"?(\d+)"#)?,
        })
    }
}

impl StatsDialect for NodeService {
    fn height_path(&self) -> &'static str {
        "network/stats"
    }

    fn last_block_path(&self) -> &'static str {
        "pool/stats"
    }

    fn extract_height(&self, body: &str) -> Option<u64> {
        capture_u64(&self.height, body)
    }

    fn extract_last_block_time(&self, body: &str) -> LastBlockField {
        capture_u64(&self.last_block, body).map(|raw| to_timestamp(raw, TimeUnit::Seconds))
    }
}

/// Compiled parsers for every supported dialect.
#[derive(Debug, Clone)]
pub struct DialectSet {
    forknote: Forknote,
    node_service: NodeService,
}

impl DialectSet {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            forknote: Forknote::new()?,
            node_service: NodeService::new()?,
        })
    }

    pub fn get(&self, dialect: Dialect) -> &dyn StatsDialect {
        match dialect {
            Dialect::Forknote => &self.forknote,
            Dialect::NodeService => &self.node_service,
        }
    }
}

fn capture_u64(pattern: &Regex, body: &str) -> Option<u64> {
    pattern
        .captures(body)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<u64>().ok())
}

fn to_timestamp(raw: u64, unit: TimeUnit) -> Option<SystemTime> {
    if raw == 0 {
        return None;
    }

    let offset = match unit {
        TimeUnit::Seconds => Duration::from_secs(raw),
        TimeUnit::Milliseconds => Duration::from_millis(raw),
    };
    UNIX_EPOCH.checked_add(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORKNOTE_STATS: &str = r#"{"config":{"ports":[{"port":3333}],"coin":"turtlecoin"},
        "pool":{"hashrate":1234,"lastBlockFound":"1530000000000","height":17},
        "network":{"difficulty":250000000,"height":571234,"timestamp":1530000100,"reward":2938000}}"#;

    #[test]
    fn forknote_reads_network_height_not_pool_height() {
        let dialect = match Forknote::new() {
            Ok(dialect) => dialect,
            Err(_) => return,
        };

        assert_eq!(dialect.extract_height(FORKNOTE_STATS), Some(571234));
        assert_eq!(
            dialect.extract_last_block_time(FORKNOTE_STATS),
            Some(Some(UNIX_EPOCH + Duration::from_secs(1_530_000_000)))
        );
    }

    #[test]
    fn forknote_treats_zero_last_block_as_never() {
        let dialect = match Forknote::new() {
            Ok(dialect) => dialect,
            Err(_) => return,
        };
        let body = r#"{"pool":{"lastBlockFound":0},"network":{"height":10}}"#;

        assert_eq!(dialect.extract_last_block_time(body), Some(None));
    }

    #[test]
    fn forknote_reports_missing_fields() {
        let dialect = match Forknote::new() {
            Ok(dialect) => dialect,
            Err(_) => return,
        };

        assert_eq!(dialect.extract_height("<html>502 Bad Gateway</html>"), None);
        assert_eq!(dialect.extract_last_block_time("{}"), None);
    }

    #[test]
    fn node_service_ignores_main_height_and_reads_seconds() {
        let dialect = match NodeService::new() {
            Ok(dialect) => dialect,
            Err(_) => return,
        };
        let network = r#"{"difficulty":1,"hash":"ab","main_height":999,"height":571230,"ts":1}"#;
        let pool = r#"{"pool_list":["pplns"],"pool_statistics":{"lastBlockFoundTime":1530000000}}"#;

        assert_eq!(dialect.extract_height(network), Some(571230));
        assert_eq!(
            dialect.extract_last_block_time(pool),
            Some(Some(UNIX_EPOCH + Duration::from_secs(1_530_000_000)))
        );
        assert_ne!(dialect.height_path(), dialect.last_block_path());
    }
}
