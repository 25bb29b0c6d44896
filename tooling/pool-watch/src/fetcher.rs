use crate::{
    dialect::{DialectSet, StatsDialect},
    models::{Dialect, PoolSample},
};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Transport that turns a URL into response text. Decompression is the
/// transport's business.
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpStatsSource {
    client: Client,
}

impl HttpStatsSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StatsSource for HttpStatsSource {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let text = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }
}

/// What the poller needs to know to query one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub pool: String,
    pub api_base: String,
    pub dialect: Dialect,
}

pub struct HeightFetcher<S> {
    source: S,
    dialects: DialectSet,
    timeout: Duration,
}

impl<S: StatsSource> HeightFetcher<S> {
    pub fn new(source: S, timeout: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            source,
            dialects: DialectSet::new()?,
            timeout,
        })
    }

    pub async fn fetch(&self, target: &FetchTarget) -> Result<PoolSample, FetchError> {
        let dialect = self.dialects.get(target.dialect);

        let height_body = self.get(&target.api_base, dialect.height_path()).await?;
        let height = dialect
            .extract_height(&height_body)
            .ok_or_else(|| FetchError::Parse("height field missing".to_owned()))?;
        if height == 0 {
            return Err(FetchError::Parse("reported height 0".to_owned()));
        }

        let last_block_found_at = if dialect.last_block_path() == dialect.height_path() {
            extract_last_block(dialect, &height_body)?
        } else {
            let body = self.get(&target.api_base, dialect.last_block_path()).await?;
            extract_last_block(dialect, &body)?
        };

        Ok(PoolSample {
            height,
            last_block_found_at,
        })
    }

    async fn get(&self, api_base: &str, path: &str) -> Result<String, FetchError> {
        let url = join_url(api_base, path);
        match time::timeout(self.timeout, self.source.get_text(&url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

fn extract_last_block(
    dialect: &dyn StatsDialect,
    body: &str,
) -> Result<Option<std::time::SystemTime>, FetchError> {
    dialect
        .extract_last_block_time(body)
        .ok_or_else(|| FetchError::Parse("last block field missing".to_owned()))
}

fn join_url(api_base: &str, path: &str) -> String {
    format!("{}/{}", api_base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Mutex, time::UNIX_EPOCH};

    #[derive(Default)]
    struct FakeSource {
        bodies: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_owned(), body.to_owned());
            self
        }
    }

    #[async_trait::async_trait]
    impl StatsSource for FakeSource {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            if let Ok(mut guard) = self.requested.lock() {
                guard.push(url.to_owned());
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Network(format!("no route to {url}")))
        }
    }

    fn target(api_base: &str, dialect: Dialect) -> FetchTarget {
        FetchTarget {
            pool: "pool.example".to_owned(),
            api_base: api_base.to_owned(),
            dialect,
        }
    }

    #[tokio::test]
    async fn forknote_uses_single_request() {
        let source = FakeSource::default().with(
            "https://pool.example:8119/stats",
            r#"{"pool":{"lastBlockFound":"1530000000000"},"network":{"height":100}}"#,
        );
        let fetcher = match HeightFetcher::new(source, Duration::from_secs(8)) {
            Ok(fetcher) => fetcher,
            Err(_) => return,
        };

        let sample = fetcher
            .fetch(&target("https://pool.example:8119/", Dialect::Forknote))
            .await;

        assert_eq!(
            sample,
            Ok(PoolSample {
                height: 100,
                last_block_found_at: Some(UNIX_EPOCH + Duration::from_secs(1_530_000_000)),
            })
        );
        let requests = fetcher.source.requested.lock().map(|guard| guard.len()).unwrap_or(0);
        assert_eq!(requests, 1);
    }

    #[tokio::test]
    async fn node_service_combines_two_endpoints() {
        let source = FakeSource::default()
            .with("https://api.pool.example/network/stats", r#"{"height":200,"main_height":1}"#)
            .with(
                "https://api.pool.example/pool/stats",
                r#"{"pool_statistics":{"lastBlockFoundTime":0}}"#,
            );
        let fetcher = match HeightFetcher::new(source, Duration::from_secs(8)) {
            Ok(fetcher) => fetcher,
            Err(_) => return,
        };

        let sample = fetcher
            .fetch(&target("https://api.pool.example", Dialect::NodeService))
            .await;

        assert_eq!(
            sample,
            Ok(PoolSample {
                height: 200,
                last_block_found_at: None,
            })
        );
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let source = FakeSource::default().with("https://pool.example/stats", "<html>maintenance</html>");
        let fetcher = match HeightFetcher::new(source, Duration::from_secs(8)) {
            Ok(fetcher) => fetcher,
            Err(_) => return,
        };

        let result = fetcher.fetch(&target("https://pool.example", Dialect::Forknote)).await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn zero_height_is_parse_error() {
        let source = FakeSource::default().with(
            "https://pool.example/stats",
            r#"{"pool":{"lastBlockFound":"0"},"network":{"height":0}}"#,
        );
        let fetcher = match HeightFetcher::new(source, Duration::from_secs(8)) {
            Ok(fetcher) => fetcher,
            Err(_) => return,
        };

        let result = fetcher.fetch(&target("https://pool.example", Dialect::Forknote)).await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    struct HangingSource;

    #[async_trait::async_trait]
    impl StatsSource for HangingSource {
        async fn get_text(&self, _url: &str) -> Result<String, FetchError> {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_pool_times_out() {
        let fetcher = match HeightFetcher::new(HangingSource, Duration::from_secs(8)) {
            Ok(fetcher) => fetcher,
            Err(_) => return,
        };

        let started = time::Instant::now();
        let result = fetcher.fetch(&target("https://slow.pool", Dialect::Forknote)).await;

        assert_eq!(result, Err(FetchError::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(8));
    }
}
