use std::io::ErrorKind;

use anyhow::{Context, Result};

use crate::errors::CacheError;
use crate::models::{CacheConfig, JidGenerator};
use crate::storage::atomic::atomic_write;
use crate::storage::index::{JidIndex, JID_FILE, NOCACHE_FILE};

/// Issues job ids and reserves their directories.
///
/// Reservation relies on exclusive directory creation, so two allocators in
/// different processes sharing one cache root never hand out the same id.
#[derive(Debug)]
pub struct JidAllocator {
    index: JidIndex,
    generator: JidGenerator,
    max_attempts: u32,
}

impl JidAllocator {
    pub fn new(index: JidIndex, config: &CacheConfig) -> Self {
        Self {
            index,
            generator: JidGenerator::new(config.unique_jid),
            max_attempts: config.max_jid_attempts.max(1),
        }
    }

    /// Reserve a job id. A non-empty `passed_jid` is used verbatim.
    pub async fn prep_jid(&self, passed_jid: Option<&str>, nocache: bool) -> Result<String> {
        let jid = match passed_jid.filter(|j| !j.is_empty()) {
            Some(jid) => {
                match self.reserve(jid).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        tracing::debug!("Reusing existing directory for passed job id {}", jid);
                    }
                    Err(e) => {
                        return Err(CacheError::from(e))
                            .with_context(|| format!("Failed to reserve job id {}", jid))
                    }
                }
                jid.to_string()
            }
            None => self.reserve_fresh().await?,
        };

        let jid_dir = self.index.jid_dir(&jid);
        atomic_write(&jid_dir.join(JID_FILE), jid.as_bytes())
            .await
            .context("Failed to write job id marker")?;
        if nocache {
            tokio::fs::write(jid_dir.join(NOCACHE_FILE), b"")
                .await
                .context("Failed to write nocache marker")?;
        }

        Ok(jid)
    }

    async fn reserve_fresh(&self) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.next_jid();
            match self.reserve(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(
                        "Job id {} already reserved (attempt {}/{}), retrying",
                        candidate,
                        attempt,
                        self.max_attempts
                    );
                }
                Err(e) => {
                    return Err(CacheError::from(e))
                        .with_context(|| format!("Failed to reserve job id {}", candidate))
                }
            }
        }

        tracing::error!(
            "Giving up on job id allocation after {} attempts",
            self.max_attempts
        );
        Err(CacheError::JidSpaceExhausted {
            attempts: self.max_attempts,
        }
        .into())
    }

    /// Create the job directory; fails with `AlreadyExists` if it is taken.
    async fn reserve(&self, jid: &str) -> std::io::Result<()> {
        let jid_dir = self.index.jid_dir(jid);
        if let Some(shard) = jid_dir.parent() {
            tokio::fs::create_dir_all(shard).await?;
        }
        tokio::fs::create_dir(&jid_dir).await
    }
}
