use crate::models::RosterEntry;
use reqwest::Client;
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster download failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("roster parse error: {0}")]
    Parse(String),
}

#[async_trait::async_trait]
pub trait RosterProvider: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError>;
}

#[derive(Debug, Clone)]
pub struct HttpRoster {
    client: Client,
    url: String,
}

impl HttpRoster {
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl RosterProvider for HttpRoster {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_roster(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RosterDocument {
    Versioned { pools: Vec<VersionedPool> },
    Legacy(BTreeMap<String, LegacyPool>),
}

#[derive(Debug, Deserialize)]
struct VersionedPool {
    url: String,
    api: String,
    #[serde(rename = "type", default = "default_dialect")]
    dialect: String,
}

/// Keyed by pool url; the inner `url` is the API base.
#[derive(Debug, Deserialize)]
struct LegacyPool {
    url: String,
    #[serde(rename = "type", default = "default_dialect")]
    dialect: String,
}

fn default_dialect() -> String {
    "forknote".to_owned()
}

/// Accepts the versioned `{"pools": [...]}` document and the older map form.
pub fn parse_roster(body: &str) -> Result<Vec<RosterEntry>, RosterError> {
    let document: RosterDocument =
        serde_json::from_str(body).map_err(|error| RosterError::Parse(error.to_string()))?;

    let entries: Vec<RosterEntry> = match document {
        RosterDocument::Versioned { pools } => pools
            .iter()
            .map(|pool| RosterEntry::new(&pool.url, &pool.api, &pool.dialect))
            .collect(),
        RosterDocument::Legacy(pools) => pools
            .iter()
            .map(|(url, pool)| RosterEntry::new(url, &pool.url, &pool.dialect))
            .collect(),
    };

    if entries.is_empty() {
        return Err(RosterError::Parse("roster lists no pools".to_owned()));
    }
    if let Some(entry) = entries.iter().find(|entry| entry.url.is_empty() || entry.api_base.is_empty()) {
        return Err(RosterError::Parse(format!(
            "roster entry with empty url or api: {:?}",
            entry.url
        )));
    }

    Ok(entries)
}
