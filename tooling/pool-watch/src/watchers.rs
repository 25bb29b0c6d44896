use crate::{models::normalize_pool_id, store::PoolStore};
use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("watch file io error: {0}")]
    Io(#[from] io::Error),
}

/// Line-oriented `pool<TAB>subscriber` file, rewritten in full on each flush.
#[derive(Debug, Clone)]
pub struct WatchFile {
    path: PathBuf,
}

impl WatchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<(String, String)>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut pairs = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((pool, subscriber)) if !pool.trim().is_empty() && !subscriber.trim().is_empty() => {
                    pairs.push((normalize_pool_id(pool), subscriber.trim().to_owned()));
                }
                _ => warn!(line = index + 1, path = %self.path.display(), "skipping malformed watch entry"),
            }
        }
        Ok(pairs)
    }

    pub async fn write(&self, pairs: &[(String, String)]) -> Result<(), PersistenceError> {
        let mut contents = String::new();
        for (pool, subscriber) in pairs {
            let _ = writeln!(contents, "{pool}\t{subscriber}");
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, contents).await?;
        fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Added,
    AlreadyWatching,
    Removed,
    NotWatching,
    UnknownPool,
}

/// Subscriptions per pool, kept on the pool records and mirrored to disk.
#[derive(Debug)]
pub struct WatchRegistry {
    store: Arc<PoolStore>,
    file: Mutex<WatchFile>,
}

impl WatchRegistry {
    pub fn new(store: Arc<PoolStore>, file: WatchFile) -> Self {
        Self {
            store,
            file: Mutex::new(file),
        }
    }

    /// Loads the file and hands every pair to the store.
    pub async fn restore(&self) -> Result<usize, PersistenceError> {
        let file = self.file.lock().await;
        let pairs = file.load().await?;
        let count = pairs.len();
        self.store.restore_watchers(pairs).await;
        info!(count, path = %file.path().display(), "watch registrations restored");
        Ok(count)
    }

    pub async fn watch(&self, pool: &str, subscriber: &str) -> Result<WatchOutcome, PersistenceError> {
        let pool_id = normalize_pool_id(pool);
        let file = self.file.lock().await;

        let inserted = self
            .store
            .update_pool(&pool_id, |record| record.watchers.insert(subscriber.to_owned()))
            .await;

        match inserted {
            None => Ok(WatchOutcome::UnknownPool),
            Some(false) => Ok(WatchOutcome::AlreadyWatching),
            Some(true) => {
                if let Err(error) = self.flush(&file).await {
                    let _ = self
                        .store
                        .update_pool(&pool_id, |record| record.watchers.remove(subscriber))
                        .await;
                    return Err(error);
                }
                info!(pool = %pool_id, subscriber, "watch added");
                Ok(WatchOutcome::Added)
            }
        }
    }

    pub async fn unwatch(&self, pool: &str, subscriber: &str) -> Result<WatchOutcome, PersistenceError> {
        let pool_id = normalize_pool_id(pool);
        let file = self.file.lock().await;

        let removed = self
            .store
            .update_pool(&pool_id, |record| record.watchers.remove(subscriber))
            .await;

        match removed {
            None => Ok(WatchOutcome::UnknownPool),
            Some(false) => Ok(WatchOutcome::NotWatching),
            Some(true) => {
                if let Err(error) = self.flush(&file).await {
                    let _ = self
                        .store
                        .update_pool(&pool_id, |record| record.watchers.insert(subscriber.to_owned()))
                        .await;
                    return Err(error);
                }
                info!(pool = %pool_id, subscriber, "watch removed");
                Ok(WatchOutcome::Removed)
            }
        }
    }

    pub async fn watchers_of(&self, pool: &str) -> Vec<String> {
        let pool_id = normalize_pool_id(pool);
        self.store
            .update_pool(&pool_id, |record| record.watchers.iter().cloned().collect())
            .await
            .unwrap_or_default()
    }

    async fn flush(&self, file: &WatchFile) -> Result<(), PersistenceError> {
        let pairs = self.store.watch_pairs().await;
        file.write(&pairs).await.inspect_err(|error| {
            warn!(error = %error, path = %file.path().display(), "watch file flush failed");
        })
    }
}
