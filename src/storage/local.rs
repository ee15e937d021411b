use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::{
    CacheConfig, Invocation, JobSummary, ReapReport, RecordOutcome, SaveLoadStatus, WorkerReport,
    WorkerReturn, REQ_JID,
};
use crate::resolver::TargetResolver;
use crate::storage::alloc::JidAllocator;
use crate::storage::codec::{JsonCodec, PayloadCodec};
use crate::storage::index::JidIndex;
use crate::storage::listing::JobLister;
use crate::storage::reaper::Reaper;
use crate::storage::records::RecordStore;
use crate::storage::JobCache;

/// Job cache rooted at `<cachedir>/jobs` on the local filesystem.
pub struct LocalJobCache {
    index: JidIndex,
    allocator: JidAllocator,
    records: RecordStore,
    lister: JobLister,
    reaper: Reaper,
}

impl LocalJobCache {
    /// Create the cache with the JSON payload codec.
    pub async fn new(config: &CacheConfig, resolver: Arc<dyn TargetResolver>) -> Result<Self> {
        Self::with_codec(config, resolver, Arc::new(JsonCodec)).await
    }

    pub async fn with_codec(
        config: &CacheConfig,
        resolver: Arc<dyn TargetResolver>,
        codec: Arc<dyn PayloadCodec>,
    ) -> Result<Self> {
        let index = JidIndex::new(&config.cachedir, config.hash_type);
        tokio::fs::create_dir_all(index.jobs_root())
            .await
            .context("Failed to create jobs directory")?;

        Ok(Self {
            allocator: JidAllocator::new(index.clone(), config),
            records: RecordStore::new(
                index.clone(),
                Arc::clone(&codec),
                resolver,
                config.read_retries,
            ),
            lister: JobLister::new(index.clone(), codec, config),
            reaper: Reaper::new(index.clone(), config.keep_jobs),
            index,
        })
    }

    pub fn index(&self) -> &JidIndex {
        &self.index
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }
}

#[async_trait]
impl JobCache for LocalJobCache {
    async fn prep_jid(&self, passed_jid: Option<&str>, nocache: bool) -> Result<String> {
        self.allocator.prep_jid(passed_jid, nocache).await
    }

    async fn save_load(&self, jid: &str, load: &Invocation) -> SaveLoadStatus {
        self.records.save_load(jid, load).await
    }

    async fn returner(&self, mut report: WorkerReport) -> Result<RecordOutcome> {
        // Standalone worker jobs arrive without an id.
        if report.jid == REQ_JID {
            report.jid = self.allocator.prep_jid(None, report.nocache).await?;
            tracing::debug!("Allocated job id {} for standalone return from {}", report.jid, report.id);
        }
        self.records.record_result(&report).await
    }

    async fn get_load(&self, jid: &str) -> Result<Option<Invocation>> {
        self.records.get_load(jid).await
    }

    async fn get_jid(&self, jid: &str) -> Result<BTreeMap<String, WorkerReturn>> {
        self.records.get_jid(jid).await
    }

    async fn get_jids(&self) -> Result<BTreeMap<String, JobSummary>> {
        self.lister.get_jids().await
    }

    async fn get_jids_filter(
        &self,
        count: usize,
        filter_find_job: bool,
    ) -> Result<Vec<JobSummary>> {
        self.lister.get_jids_filter(count, filter_find_job).await
    }

    async fn clean_old_jobs(&self) -> Result<ReapReport> {
        self.reaper.clean_old_jobs().await
    }

    async fn update_endtime(&self, jid: &str, time: &str) -> bool {
        self.records.update_endtime(jid, time).await
    }

    async fn get_endtime(&self, jid: &str) -> Result<Option<String>> {
        self.records.get_endtime(jid).await
    }
}
