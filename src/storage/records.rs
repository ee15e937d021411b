use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::errors::CacheError;
use crate::models::{Invocation, RecordOutcome, SaveLoadStatus, WorkerReport, WorkerReturn};
use crate::resolver::TargetResolver;
use crate::storage::atomic::{atomic_create, atomic_write};
use crate::storage::codec::{decode_typed, encode_typed, PayloadCodec};
use crate::storage::index::{
    JidIndex, ENDTIME_FILE, JID_FILE, LOAD_P, MINIONS_P, NOCACHE_FILE, OUT_P, RETURN_P,
};

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Reads and writes the records inside a job directory.
pub struct RecordStore {
    index: JidIndex,
    codec: Arc<dyn PayloadCodec>,
    resolver: Arc<dyn TargetResolver>,
    read_retries: u32,
}

impl RecordStore {
    pub fn new(
        index: JidIndex,
        codec: Arc<dyn PayloadCodec>,
        resolver: Arc<dyn TargetResolver>,
        read_retries: u32,
    ) -> Self {
        Self {
            index,
            codec,
            resolver,
            read_retries: read_retries.max(1),
        }
    }

    /// Persist the invocation and a snapshot of its resolved targets.
    ///
    /// Write failures are logged, never returned.
    pub async fn save_load(&self, jid: &str, load: &Invocation) -> SaveLoadStatus {
        let jid_dir = self.index.jid_dir(jid);
        let load_path = jid_dir.join(LOAD_P);

        if let Err(e) = tokio::fs::create_dir_all(&jid_dir).await {
            tracing::warn!("Could not create job directory for {}: {}", jid, e);
            return SaveLoadStatus::NotSaved;
        }
        if path_exists(&load_path).await {
            tracing::warn!("Invocation for job {} already recorded, keeping original", jid);
            return SaveLoadStatus::AlreadySaved;
        }

        let mut targets_saved = true;
        if let Some(tgt) = &load.tgt {
            targets_saved = match self.resolver.check_minions(tgt, load.target_type()).await {
                Ok(minions) => match self.write_record(&jid_dir.join(MINIONS_P), &minions).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "Could not write job cache file for minions {:?}: {:#}",
                            minions,
                            e
                        );
                        false
                    }
                },
                Err(e) => {
                    tracing::warn!("Could not resolve target {} for job {}: {:#}", tgt, jid, e);
                    false
                }
            };
        }

        let created = match encode_typed(self.codec.as_ref(), load) {
            Ok(bytes) => atomic_create(&load_path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        match created {
            Ok(true) if targets_saved => SaveLoadStatus::Saved,
            Ok(true) => SaveLoadStatus::SavedWithoutTargets,
            Ok(false) => {
                tracing::warn!("Invocation for job {} written concurrently, keeping original", jid);
                SaveLoadStatus::AlreadySaved
            }
            Err(e) => {
                tracing::warn!("Could not write job invocation cache file: {:#}", e);
                SaveLoadStatus::NotSaved
            }
        }
    }

    /// Store one worker's result. The job id must already be concrete.
    pub async fn record_result(&self, report: &WorkerReport) -> Result<RecordOutcome> {
        validate_worker_id(&report.id)?;

        let jid = report.jid.clone();
        let worker = report.id.clone();
        let jid_dir = self.index.jid_dir(&jid);

        if path_exists(&jid_dir.join(NOCACHE_FILE)).await {
            tracing::debug!("Job {} is marked nocache, dropping return from {}", jid, worker);
            return Ok(RecordOutcome::NoCache { jid });
        }

        let worker_dir = jid_dir.join(&worker);
        match tokio::fs::create_dir(&worker_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::error!(
                    "An extra return was detected from worker {}, please verify the worker, \
                     this could be a replay attack",
                    worker
                );
                return Ok(RecordOutcome::ReplayRejected { jid, worker });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::error!(
                    "An inconsistency occurred, a job was received with a job id \
                     that is not present in the local cache: {}",
                    jid
                );
                return Ok(RecordOutcome::InconsistentJob { jid, worker });
            }
            Err(e) => {
                return Err(CacheError::from(e))
                    .with_context(|| format!("Failed to create result directory for {}", worker))
            }
        }

        self.write_payload(&worker_dir.join(RETURN_P), &report.ret)
            .await
            .context("Failed to write worker result")?;
        if let Some(out) = &report.out {
            self.write_payload(&worker_dir.join(OUT_P), out)
                .await
                .context("Failed to write worker output")?;
        }

        tracing::debug!("Recorded return from {} for job {}", worker, jid);
        Ok(RecordOutcome::Recorded { jid })
    }

    /// The stored invocation merged with its target snapshot.
    pub async fn get_load(&self, jid: &str) -> Result<Option<Invocation>> {
        let jid_dir = self.index.jid_dir(jid);
        let Some(bytes) = read_optional(&jid_dir.join(LOAD_P)).await? else {
            return Ok(None);
        };
        let mut load: Invocation = decode_typed(self.codec.as_ref(), &bytes)
            .with_context(|| format!("Failed to decode invocation for job {}", jid))?;

        if let Some(bytes) = read_optional(&jid_dir.join(MINIONS_P)).await? {
            let minions: Vec<String> = decode_typed(self.codec.as_ref(), &bytes)
                .with_context(|| format!("Failed to decode target snapshot for job {}", jid))?;
            load.minions = Some(minions);
        }

        Ok(Some(load))
    }

    /// Every stored worker result for a job, keyed by worker id.
    pub async fn get_jid(&self, jid: &str) -> Result<BTreeMap<String, WorkerReturn>> {
        let mut returns = BTreeMap::new();
        let jid_dir = self.index.jid_dir(jid);

        let mut entries = match tokio::fs::read_dir(&jid_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(returns),
            Err(e) => {
                return Err(CacheError::from(e))
                    .with_context(|| format!("Failed to read job directory for {}", jid))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list job directory for {}", jid))?
        {
            let Ok(worker) = entry.file_name().into_string() else {
                continue;
            };
            if worker.starts_with('.') {
                continue;
            }
            let worker_dir = entry.path();
            if !is_file(&worker_dir.join(RETURN_P)).await {
                continue;
            }
            if let Some(worker_return) = self.read_worker_return(&worker, &worker_dir).await? {
                returns.insert(worker, worker_return);
            }
        }

        Ok(returns)
    }

    /// Overwrite the plain-text end time. Failures are logged only.
    pub async fn update_endtime(&self, jid: &str, time: &str) -> bool {
        let jid_dir = self.index.jid_dir(jid);
        let written = match tokio::fs::create_dir_all(&jid_dir).await {
            Ok(()) => atomic_write(&jid_dir.join(ENDTIME_FILE), time.as_bytes()).await,
            Err(e) => Err(e.into()),
        };
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Could not write job end time for {}: {:#}", jid, e);
                false
            }
        }
    }

    /// `None` when no end time has been stored.
    pub async fn get_endtime(&self, jid: &str) -> Result<Option<String>> {
        read_endtime(&self.index.jid_dir(jid)).await
    }

    pub async fn is_nocache(&self, jid: &str) -> bool {
        path_exists(&self.index.jid_dir(jid).join(NOCACHE_FILE)).await
    }

    /// Retries transient failures; permission errors propagate at once.
    async fn read_worker_return(
        &self,
        worker: &str,
        worker_dir: &Path,
    ) -> Result<Option<WorkerReturn>> {
        for attempt in 1..=self.read_retries {
            match self.try_read_worker_return(worker_dir).await {
                Ok(worker_return) => return Ok(Some(worker_return)),
                Err(e @ CacheError::PermissionDenied(_)) => {
                    return Err(e)
                        .with_context(|| format!("Failed to read result for worker {}", worker))
                }
                Err(e) => {
                    tracing::debug!(
                        "Read of result for worker {} failed (attempt {}/{}): {}",
                        worker,
                        attempt,
                        self.read_retries,
                        e
                    );
                    if attempt < self.read_retries {
                        tokio::time::sleep(READ_RETRY_BACKOFF).await;
                    }
                }
            }
        }

        tracing::warn!(
            "Omitting result for worker {} after {} failed reads",
            worker,
            self.read_retries
        );
        Ok(None)
    }

    async fn try_read_worker_return(&self, worker_dir: &Path) -> Result<WorkerReturn, CacheError> {
        let ret = self.read_payload(&worker_dir.join(RETURN_P)).await?;
        let out = match self.read_payload(&worker_dir.join(OUT_P)).await {
            Ok(out) => Some(out),
            Err(CacheError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(WorkerReturn { ret, out })
    }

    async fn read_payload(&self, path: &Path) -> Result<Value, CacheError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => CacheError::NotFound(path.display().to_string()),
            _ => CacheError::from(e),
        })?;
        self.codec.decode(&bytes)
    }

    async fn write_payload(&self, path: &Path, value: &Value) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        atomic_write(path, &bytes).await
    }

    async fn write_record<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = encode_typed(self.codec.as_ref(), value)?;
        atomic_write(path, &bytes).await
    }
}

/// Worker ids become directory names next to the job's own files.
fn validate_worker_id(worker: &str) -> Result<(), CacheError> {
    if worker.is_empty() {
        return Err(CacheError::Validation("Worker id cannot be empty".to_string()));
    }
    if worker.starts_with('.') || worker.contains(['/', '\\', '\0']) {
        return Err(CacheError::Validation(format!(
            "Worker id '{}' is not a valid directory name",
            worker
        )));
    }
    if [JID_FILE, NOCACHE_FILE, ENDTIME_FILE].contains(&worker) {
        return Err(CacheError::Validation(format!(
            "Worker id '{}' is reserved",
            worker
        )));
    }
    Ok(())
}

pub(crate) async fn read_endtime(jid_dir: &Path) -> Result<Option<String>> {
    let Some(bytes) = read_optional(&jid_dir.join(ENDTIME_FILE)).await? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    Ok(Some(text.trim_end_matches('\n').to_string()))
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::from(e)).with_context(|| format!("Failed to read {}", path.display())),
    }
}

pub(crate) async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HashType;
    use crate::resolver::StaticResolver;
    use crate::storage::codec::JsonCodec;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_store() -> (RecordStore, JidIndex, TempDir) {
        let tmp = TempDir::new().expect("create temp dir");
        let index = JidIndex::new(tmp.path(), HashType::Sha256);
        let store = RecordStore::new(
            index.clone(),
            Arc::new(JsonCodec),
            Arc::new(StaticResolver::new(["w1", "w2", "db1"])),
            3,
        );
        (store, index, tmp)
    }

    async fn reserve(index: &JidIndex, jid: &str) {
        let dir = index.jid_dir(jid);
        tokio::fs::create_dir_all(&dir).await.expect("mkdir");
        tokio::fs::write(dir.join(JID_FILE), jid).await.expect("write jid");
    }

    #[tokio::test]
    async fn test_save_and_get_load_with_targets() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "100").await;
        let load = Invocation::new("test.ping").with_target("w*", None);

        let status = store.save_load("100", &load).await;
        assert_eq!(status, SaveLoadStatus::Saved);

        let loaded = store.get_load("100").await.expect("get").expect("present");
        assert_eq!(loaded.function(), "test.ping");
        assert_eq!(loaded.minions, Some(vec!["w1".to_string(), "w2".to_string()]));
    }

    #[tokio::test]
    async fn test_save_load_creates_missing_directory() {
        let (store, index, _tmp) = setup_store();
        let status = store.save_load("external", &Invocation::new("cmd.run")).await;
        assert_eq!(status, SaveLoadStatus::Saved);
        assert!(index.jid_dir("external").join(LOAD_P).is_file());
        assert!(!index.jid_dir("external").join(MINIONS_P).exists());
    }

    #[tokio::test]
    async fn test_save_load_resolution_failure_still_saves_load() {
        let (store, index, _tmp) = setup_store();
        let load = Invocation::new("test.ping").with_target("G@os:linux", Some("grain"));
        let status = store.save_load("200", &load).await;
        assert_eq!(status, SaveLoadStatus::SavedWithoutTargets);
        assert!(index.jid_dir("200").join(LOAD_P).is_file());
        assert!(!index.jid_dir("200").join(MINIONS_P).exists());

        let loaded = store.get_load("200").await.expect("get").expect("present");
        assert!(loaded.minions.is_none());
    }

    #[tokio::test]
    async fn test_save_load_is_write_once() {
        let (store, _index, _tmp) = setup_store();
        store.save_load("300", &Invocation::new("first.fun")).await;
        let status = store.save_load("300", &Invocation::new("second.fun")).await;
        assert_eq!(status, SaveLoadStatus::AlreadySaved);

        let loaded = store.get_load("300").await.expect("get").expect("present");
        assert_eq!(loaded.function(), "first.fun");
    }

    #[tokio::test]
    async fn test_get_load_missing() {
        let (store, index, _tmp) = setup_store();
        assert!(store.get_load("nope").await.expect("get").is_none());
        reserve(&index, "reserved").await;
        assert!(store.get_load("reserved").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_record_result_and_get_jid() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "400").await;

        let report = WorkerReport::new("400", "w1", json!({"ret": true})).with_output(json!("nested"));
        let outcome = store.record_result(&report).await.expect("record");
        assert_eq!(outcome, RecordOutcome::Recorded { jid: "400".to_string() });

        let returns = store.get_jid("400").await.expect("get_jid");
        assert_eq!(returns.len(), 1);
        assert_eq!(returns["w1"].ret, json!({"ret": true}));
        assert_eq!(returns["w1"].out, Some(json!("nested")));
    }

    #[tokio::test]
    async fn test_replay_is_rejected_and_keeps_first_payload() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "500").await;

        let first = WorkerReport::new("500", "w1", json!(1));
        let second = WorkerReport::new("500", "w1", json!(2));
        assert!(store.record_result(&first).await.expect("first").is_recorded());
        let outcome = store.record_result(&second).await.expect("second");
        assert_eq!(
            outcome,
            RecordOutcome::ReplayRejected {
                jid: "500".to_string(),
                worker: "w1".to_string()
            }
        );
        assert_eq!(store.get_jid("500").await.expect("get")["w1"].ret, json!(1));
    }

    #[tokio::test]
    async fn test_unknown_job_is_inconsistent_and_creates_nothing() {
        let (store, index, _tmp) = setup_store();
        let outcome = store
            .record_result(&WorkerReport::new("ghost", "w1", json!(true)))
            .await
            .expect("record");
        assert!(matches!(outcome, RecordOutcome::InconsistentJob { .. }));
        assert!(!index.jid_dir("ghost").exists());
    }

    #[tokio::test]
    async fn test_nocache_job_drops_results() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "600").await;
        tokio::fs::write(index.jid_dir("600").join(NOCACHE_FILE), b"")
            .await
            .expect("write nocache");

        assert!(store.is_nocache("600").await);
        let outcome = store
            .record_result(&WorkerReport::new("600", "w1", json!(true)))
            .await
            .expect("record");
        assert_eq!(outcome, RecordOutcome::NoCache { jid: "600".to_string() });
        assert!(!index.worker_dir("600", "w1").exists());
    }

    #[tokio::test]
    async fn test_invalid_worker_ids_rejected() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "700").await;
        for worker in ["", ".hidden", "../escape", "a/b", "jid", "endtime", "nocache"] {
            let err = store
                .record_result(&WorkerReport::new("700", worker, json!(1)))
                .await
                .unwrap_err();
            assert!(
                matches!(err.downcast_ref::<CacheError>(), Some(CacheError::Validation(_))),
                "worker id {:?} should be rejected",
                worker
            );
        }
    }

    #[tokio::test]
    async fn test_get_jid_skips_hidden_and_incomplete_entries() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "800").await;
        store
            .record_result(&WorkerReport::new("800", "w1", json!("ok")))
            .await
            .expect("record");
        // Reported but payload not written yet.
        tokio::fs::create_dir(index.worker_dir("800", "w2")).await.expect("mkdir");
        tokio::fs::create_dir(index.worker_dir("800", ".staging")).await.expect("mkdir");
        tokio::fs::write(index.worker_dir("800", ".staging").join(RETURN_P), b"1")
            .await
            .expect("write");

        let returns = store.get_jid("800").await.expect("get_jid");
        assert_eq!(returns.keys().collect::<Vec<_>>(), vec!["w1"]);
    }

    #[tokio::test]
    async fn test_get_jid_omits_undecodable_after_retries() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "900").await;
        let worker_dir = index.worker_dir("900", "w1");
        tokio::fs::create_dir(&worker_dir).await.expect("mkdir");
        tokio::fs::write(worker_dir.join(RETURN_P), b"{\"trunc").await.expect("write");
        store
            .record_result(&WorkerReport::new("900", "w2", json!(2)))
            .await
            .expect("record");

        let returns = store.get_jid("900").await.expect("get_jid");
        assert!(!returns.contains_key("w1"));
        assert_eq!(returns["w2"].ret, json!(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_get_jid_permission_denied_propagates() {
        use std::os::unix::fs::PermissionsExt;

        let (store, index, _tmp) = setup_store();
        reserve(&index, "1000").await;
        store
            .record_result(&WorkerReport::new("1000", "w1", json!(1)))
            .await
            .expect("record");
        let ret_path = index.worker_dir("1000", "w1").join(RETURN_P);
        std::fs::set_permissions(&ret_path, std::fs::Permissions::from_mode(0o000))
            .expect("chmod");
        if std::fs::read(&ret_path).is_ok() {
            // Running as root: permission bits are not enforced.
            return;
        }

        let err = store.get_jid("1000").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_get_jid_unknown_job_is_empty() {
        let (store, _index, _tmp) = setup_store();
        assert!(store.get_jid("missing").await.expect("get_jid").is_empty());
    }

    #[tokio::test]
    async fn test_endtime_roundtrip_and_absent() {
        let (store, index, _tmp) = setup_store();
        reserve(&index, "1100").await;
        assert_eq!(store.get_endtime("1100").await.expect("get"), None);

        assert!(store.update_endtime("1100", "2026, Oct 14 09:01:05.000000\n").await);
        assert_eq!(
            store.get_endtime("1100").await.expect("get").as_deref(),
            Some("2026, Oct 14 09:01:05.000000")
        );

        assert!(store.update_endtime("1100", "").await);
        assert_eq!(store.get_endtime("1100").await.expect("get").as_deref(), Some(""));
    }
}
