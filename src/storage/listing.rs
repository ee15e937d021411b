use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::errors::CacheError;
use crate::models::{CacheConfig, Invocation, JobSummary};
use crate::storage::codec::{decode_typed, PayloadCodec};
use crate::storage::index::{JidIndex, JID_FILE, LOAD_P};
use crate::storage::records::read_endtime;

/// Fixed-capacity list of the highest job ids seen, kept ascending.
#[derive(Debug)]
pub struct RecentJobs {
    capacity: usize,
    entries: Vec<JobSummary>,
}

impl RecentJobs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity.saturating_add(1).min(1024)),
        }
    }

    /// Insert in job id order, evicting the oldest entry on overflow.
    /// Returns false when the job is older than everything kept.
    pub fn offer(&mut self, summary: JobSummary) -> bool {
        let pos = self.entries.partition_point(|e| e.jid <= summary.jid);
        if pos == 0 && self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.insert(pos, summary);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<JobSummary> {
        self.entries
    }
}

/// Walks the job tree to build listings.
pub struct JobLister {
    index: JidIndex,
    codec: Arc<dyn PayloadCodec>,
    store_endtime: bool,
    polling_functions: Vec<String>,
}

impl JobLister {
    pub fn new(index: JidIndex, codec: Arc<dyn PayloadCodec>, config: &CacheConfig) -> Self {
        Self {
            index,
            codec,
            store_endtime: config.job_cache_store_endtime,
            polling_functions: config.polling_functions.clone(),
        }
    }

    /// Summaries of every job with a readable invocation.
    pub async fn get_jids(&self) -> Result<BTreeMap<String, JobSummary>> {
        let mut jobs = BTreeMap::new();
        self.walk(|jid, load| {
            let summary = JobSummary::from_invocation(&jid, &load);
            jobs.insert(jid, summary);
        })
        .await?;

        if self.store_endtime {
            for (jid, summary) in jobs.iter_mut() {
                match read_endtime(&self.index.jid_dir(jid)).await {
                    Ok(end_time) => summary.end_time = end_time.filter(|t| !t.is_empty()),
                    Err(e) => tracing::debug!("Skipping end time for job {}: {:#}", jid, e),
                }
            }
        }

        Ok(jobs)
    }

    /// The `count` most recent jobs, ascending by job id.
    pub async fn get_jids_filter(
        &self,
        count: usize,
        filter_find_job: bool,
    ) -> Result<Vec<JobSummary>> {
        let mut recent = RecentJobs::new(count);
        self.walk(|jid, load| {
            if filter_find_job && self.is_polling(load.function()) {
                return;
            }
            recent.offer(JobSummary::from_invocation(&jid, &load));
        })
        .await?;
        Ok(recent.into_vec())
    }

    fn is_polling(&self, fun: &str) -> bool {
        self.polling_functions.iter().any(|f| f == fun)
    }

    /// Visit every `(jid, load)` pair. Entries that vanish or fail to
    /// decode mid-walk are skipped.
    async fn walk<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(String, Invocation) + Send,
    {
        let root = self.index.jobs_root();
        let mut shards = match tokio::fs::read_dir(root).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
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
                let leaf_dir = leaf.path();
                let load_path = leaf_dir.join(LOAD_P);
                let Ok(bytes) = tokio::fs::read(&load_path).await else {
                    continue;
                };
                let load: Invocation = match decode_typed(self.codec.as_ref(), &bytes) {
                    Ok(load) => load,
                    Err(e) => {
                        tracing::warn!("Skipping malformed load file {:?}: {}", load_path, e);
                        continue;
                    }
                };

                let jid = if load.jid.is_empty() {
                    match tokio::fs::read_to_string(leaf_dir.join(JID_FILE)).await {
                        Ok(marker) => marker.trim().to_string(),
                        Err(_) => continue,
                    }
                } else {
                    load.jid.clone()
                };
                if jid.is_empty() {
                    continue;
                }

                visit(jid, load);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(jid: &str) -> JobSummary {
        JobSummary::from_invocation(jid, &Invocation::new("test.ping"))
    }

    fn jids(recent: RecentJobs) -> Vec<String> {
        recent.into_vec().into_iter().map(|s| s.jid).collect()
    }

    #[test]
    fn test_recent_jobs_keeps_highest_ascending() {
        let mut recent = RecentJobs::new(3);
        for jid in ["05", "01", "09", "03", "07", "02"] {
            recent.offer(summary(jid));
        }
        assert_eq!(jids(recent), vec!["05", "07", "09"]);
    }

    #[test]
    fn test_recent_jobs_skips_older_than_all_when_full() {
        let mut recent = RecentJobs::new(2);
        assert!(recent.offer(summary("10")));
        assert!(recent.offer(summary("20")));
        assert!(!recent.offer(summary("05")));
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_recent_jobs_under_capacity_keeps_all() {
        let mut recent = RecentJobs::new(10);
        for jid in ["3", "1", "2"] {
            recent.offer(summary(jid));
        }
        assert_eq!(jids(recent), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_recent_jobs_zero_capacity() {
        let mut recent = RecentJobs::new(0);
        assert!(!recent.offer(summary("1")));
        assert!(recent.is_empty());
    }
}
