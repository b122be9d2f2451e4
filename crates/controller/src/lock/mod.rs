use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use foreman_common::config::LockConfig;
use foreman_common::{ControllerError, Result};

/// On-disk lock record at `<path>.lock`.
#[derive(Debug, Serialize, Deserialize)]
struct LockFileContents {
    holder_id: String,
    acquired_at: DateTime<Utc>,
}

/// File-based advisory lock for multi-process coordination.
///
/// Acquisition is an exclusive create of `<path>.lock`; contention retries
/// with jittered growing delays; locks older than the steal threshold are
/// presumed abandoned and forcibly replaced. One process instance keeps a
/// single stable holder id.
pub struct FileLock {
    config: LockConfig,
    holder_id: String,
}

impl FileLock {
    pub fn new(config: LockConfig) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let holder_id = format!("{}-{}", config.holder_id_prefix, &suffix[..8]);
        Self { config, holder_id }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock on `path`, retrying on contention. Gives up after
    /// `lock_retry_attempts` retries or once `lock_timeout_ms` has elapsed,
    /// whichever comes first.
    pub async fn acquire(&self, path: &Path) -> Result<()> {
        let lock_path = Self::lock_path(path);
        let deadline = std::time::Instant::now()
            + Duration::from_millis(self.config.lock_timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            match self.try_create(&lock_path).await {
                Ok(()) => {
                    tracing::debug!(path = %lock_path.display(), holder = %self.holder_id, "Lock acquired");
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(contents) = read_contents(&lock_path).await {
                        let age_ms = (Utc::now() - contents.acquired_at).num_milliseconds();
                        if age_ms >= 0 && age_ms as u64 >= self.config.lock_steal_threshold_ms {
                            tracing::warn!(
                                path = %lock_path.display(),
                                previous_holder = %contents.holder_id,
                                age_ms,
                                "Stealing expired lock"
                            );
                            metrics::counter!("lock.steals").increment(1);
                            let _ = tokio::fs::remove_file(&lock_path).await;
                            continue;
                        }
                    }

                    attempt += 1;
                    if attempt >= self.config.lock_retry_attempts
                        || std::time::Instant::now() >= deadline
                    {
                        metrics::counter!("lock.contention_failures").increment(1);
                        return Err(ControllerError::LockContention {
                            path: path.display().to_string(),
                            attempts: attempt,
                        });
                    }
                    tokio::time::sleep(self.retry_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Release the lock. Only the holder may release; a mismatched holder id
    /// means the lock was stolen out from under us.
    pub async fn release(&self, path: &Path) -> Result<()> {
        let lock_path = Self::lock_path(path);

        match read_contents(&lock_path).await {
            Some(contents) if contents.holder_id == self.holder_id => {
                tokio::fs::remove_file(&lock_path).await?;
                tracing::debug!(path = %lock_path.display(), "Lock released");
                Ok(())
            }
            Some(contents) => Err(ControllerError::LockStolen {
                path: path.display().to_string(),
                previous_holder: contents.holder_id,
            }),
            None => Ok(()),
        }
    }

    /// Run `f` under the lock on `path`, releasing afterwards regardless of
    /// the outcome.
    pub async fn with_lock<T, F, Fut>(&self, path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(path).await?;
        let result = f().await;
        if let Err(e) = self.release(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Lock release failed");
        }
        result
    }

    async fn try_create(&self, lock_path: &Path) -> std::io::Result<()> {
        let contents = LockFileContents {
            holder_id: self.holder_id.clone(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
        let ms = self.config.lock_retry_delay_ms as f64 * (1.0 + attempt as f64 * 0.25) * jitter;
        Duration::from_millis(ms as u64)
    }
}

async fn read_contents(lock_path: &Path) -> Option<LockFileContents> {
    let raw = tokio::fs::read(lock_path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}
