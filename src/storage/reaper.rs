use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::sync::Notify;

use crate::errors::CacheError;
use crate::models::ReapReport;
use crate::storage::index::{JidIndex, JID_FILE};
use crate::storage::records::path_exists;

enum Verdict {
    Keep,
    Expired,
    Corrupted,
}

/// Age-based garbage collection of job directories.
#[derive(Debug, Clone)]
pub struct Reaper {
    index: JidIndex,
    keep_jobs: u64,
}

impl Reaper {
    /// `keep_jobs` is the retention window in hours; 0 disables reaping.
    pub fn new(index: JidIndex, keep_jobs: u64) -> Self {
        Self { index, keep_jobs }
    }

    pub async fn clean_old_jobs(&self) -> Result<ReapReport> {
        self.clean_old_jobs_at(SystemTime::now()).await
    }

    /// Reap relative to `now`. A failure on one entry never stops the walk.
    pub async fn clean_old_jobs_at(&self, now: SystemTime) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        if self.keep_jobs == 0 {
            return Ok(report);
        }

        let root = self.index.jobs_root();
        let mut shards = match tokio::fs::read_dir(root).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(CacheError::from(e))
                    .with_context(|| format!("Failed to read jobs directory {}", root.display()))
            }
        };

        while let Some(shard) = shards
            .next_entry()
            .await
            .context("Failed to list jobs directory")?
        {
            let Ok(mut leaves) = tokio::fs::read_dir(shard.path()).await else {
                continue;
            };
            while let Ok(Some(leaf)) = leaves.next_entry().await {
                let is_dir = leaf.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                report.scanned += 1;

                let leaf_dir = leaf.path();
                match self.classify(&leaf_dir, now).await {
                    Verdict::Keep => {}
                    Verdict::Expired => {
                        if remove_job_dir(&leaf_dir).await {
                            report.expired += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                    Verdict::Corrupted => {
                        tracing::debug!("Removing job directory without a jid marker: {:?}", leaf_dir);
                        if remove_job_dir(&leaf_dir).await {
                            report.corrupted += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.removed() > 0 || report.failed > 0 {
            tracing::info!(
                "Job cache cleanup: {} expired, {} corrupted, {} failed ({} scanned)",
                report.expired,
                report.corrupted,
                report.failed,
                report.scanned
            );
        }
        Ok(report)
    }

    /// Run cleanup every `every` until `shutdown` is notified.
    pub async fn run(&self, every: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.clean_old_jobs().await {
                        tracing::error!("Job cache cleanup failed: {:#}", e);
                    }
                }
                _ = shutdown.notified() => {
                    tracing::info!("Job cache reaper stopping");
                    break;
                }
            }
        }
    }

    async fn classify(&self, leaf_dir: &Path, now: SystemTime) -> Verdict {
        let meta = match tokio::fs::metadata(leaf_dir.join(JID_FILE)).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Verdict::Corrupted,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The whole entry may have vanished mid-walk.
                return if path_exists(leaf_dir).await {
                    Verdict::Corrupted
                } else {
                    Verdict::Keep
                };
            }
            Err(e) => {
                tracing::warn!("Could not stat jid marker in {:?}: {}", leaf_dir, e);
                return Verdict::Keep;
            }
        };

        let Ok(reserved_at) = meta.created().or_else(|_| meta.modified()) else {
            tracing::warn!("No timestamp available for jid marker in {:?}", leaf_dir);
            return Verdict::Keep;
        };
        let age = now.duration_since(reserved_at).unwrap_or(Duration::ZERO);
        let age_hours = age.as_secs_f64() / 3600.0;
        if age_hours > self.keep_jobs as f64 {
            Verdict::Expired
        } else {
            Verdict::Keep
        }
    }
}

async fn remove_job_dir(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => true,
        // Already gone: another reaper got there first.
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove job directory {:?}: {}", path, e);
            false
        }
    }
}
