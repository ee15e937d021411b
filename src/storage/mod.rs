pub mod alloc;
pub mod atomic;
pub mod codec;
pub mod index;
pub mod listing;
pub mod local;
pub mod reaper;
pub mod records;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Invocation, JobSummary, ReapReport, RecordOutcome, SaveLoadStatus, WorkerReport, WorkerReturn,
};

pub use local::LocalJobCache;

#[async_trait]
pub trait JobCache: Send + Sync {
    /// Reserve a job id, or claim `passed_jid` verbatim.
    async fn prep_jid(&self, passed_jid: Option<&str>, nocache: bool) -> Result<String>;
    async fn save_load(&self, jid: &str, load: &Invocation) -> SaveLoadStatus;
    /// Record a worker report. Replays and unknown jobs are outcomes, not errors.
    async fn returner(&self, report: WorkerReport) -> Result<RecordOutcome>;
    async fn get_load(&self, jid: &str) -> Result<Option<Invocation>>;
    async fn get_jid(&self, jid: &str) -> Result<BTreeMap<String, WorkerReturn>>;
    async fn get_jids(&self) -> Result<BTreeMap<String, JobSummary>>;
    async fn get_jids_filter(&self, count: usize, filter_find_job: bool)
        -> Result<Vec<JobSummary>>;
    async fn clean_old_jobs(&self) -> Result<ReapReport>;
    async fn update_endtime(&self, jid: &str, time: &str) -> bool;
    async fn get_endtime(&self, jid: &str) -> Result<Option<String>>;
}
