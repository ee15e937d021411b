use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A worker's report for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerReport {
    pub jid: String,
    /// Worker id.
    pub id: String,
    #[serde(rename = "return")]
    pub ret: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<Value>,
    /// Only honoured when `jid` is the `req` placeholder.
    #[serde(default)]
    pub nocache: bool,
}

impl WorkerReport {
    pub fn new(jid: impl Into<String>, worker: impl Into<String>, ret: Value) -> Self {
        Self {
            jid: jid.into(),
            id: worker.into(),
            ret,
            out: None,
            nocache: false,
        }
    }

    pub fn with_output(mut self, out: Value) -> Self {
        self.out = Some(out);
        self
    }
}

/// One worker's stored result, as returned by result lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerReturn {
    #[serde(rename = "return")]
    pub ret: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<Value>,
}

/// Outcome of recording a worker report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome")]
pub enum RecordOutcome {
    Recorded { jid: String },
    /// The job opted out of result caching.
    NoCache { jid: String },
    /// The worker already reported for this job.
    ReplayRejected { jid: String, worker: String },
    /// No job directory exists for the reported id.
    InconsistentJob { jid: String, worker: String },
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded { .. })
    }
}

/// Outcome of persisting an invocation. Write failures are not errors.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SaveLoadStatus {
    Saved,
    /// The load was written but the target snapshot was not.
    SavedWithoutTargets,
    /// A load already exists for this job and was left untouched.
    AlreadySaved,
    NotSaved,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReapReport {
    pub scanned: usize,
    pub expired: usize,
    pub corrupted: usize,
    pub failed: usize,
}

impl ReapReport {
    pub fn removed(&self) -> usize {
        self.expired + self.corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_worker_report_wire_names() {
        let raw = json!({"jid": "req", "id": "w1", "return": {"ret": true}, "nocache": true});
        let report: WorkerReport = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(report.id, "w1");
        assert_eq!(report.ret, json!({"ret": true}));
        assert!(report.out.is_none());
        assert!(report.nocache);
    }

    #[test]
    fn test_worker_report_nocache_defaults_false() {
        let raw = json!({"jid": "1", "id": "w1", "return": 1});
        let report: WorkerReport = serde_json::from_value(raw).expect("deserialize");
        assert!(!report.nocache);
    }

    #[test]
    fn test_record_outcome_serializes_tagged() {
        let outcome = RecordOutcome::ReplayRejected {
            jid: "1".to_string(),
            worker: "w1".to_string(),
        };
        let json = serde_json::to_string(&outcome).expect("serialize");
        assert!(json.contains("\"outcome\":\"ReplayRejected\""));
        assert!(!outcome.is_recorded());
    }

    #[test]
    fn test_reap_report_removed() {
        let report = ReapReport {
            scanned: 5,
            expired: 2,
            corrupted: 1,
            failed: 0,
        };
        assert_eq!(report.removed(), 3);
    }
}
