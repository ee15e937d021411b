use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::jid::jid_to_time;

/// Published job metadata (the "load").
///
/// Only the fields the cache itself reads are typed; everything else the
/// dispatcher sends is carried through `extra` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Invocation {
    #[serde(default)]
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fun: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tgt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tgt_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Resolved worker list; filled in on load from the snapshot file.
    #[serde(default, rename = "Minions", skip_serializing_if = "Option::is_none")]
    pub minions: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Invocation {
    pub fn new(fun: impl Into<String>) -> Self {
        Self {
            fun: Some(fun.into()),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, tgt: impl Into<Value>, tgt_type: Option<&str>) -> Self {
        self.tgt = Some(tgt.into());
        self.tgt_type = tgt_type.map(str::to_string);
        self
    }

    pub fn function(&self) -> &str {
        self.fun.as_deref().unwrap_or("unknown-function")
    }

    /// Target type, defaulting to glob matching.
    pub fn target_type(&self) -> &str {
        self.tgt_type.as_deref().unwrap_or("glob")
    }
}

/// Listing view of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    #[serde(rename = "JID")]
    pub jid: String,
    #[serde(rename = "Function")]
    pub function: String,
    #[serde(rename = "Arguments")]
    pub arguments: Vec<Value>,
    #[serde(rename = "Target")]
    pub target: Value,
    #[serde(rename = "Target-type")]
    pub target_type: Option<String>,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "StartTime")]
    pub start_time: Option<String>,
    #[serde(rename = "EndTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl JobSummary {
    pub fn from_invocation(jid: &str, load: &Invocation) -> Self {
        Self {
            jid: jid.to_string(),
            function: load.function().to_string(),
            arguments: load.arg.clone(),
            target: load
                .tgt
                .clone()
                .unwrap_or_else(|| Value::String("unknown-target".to_string())),
            target_type: load.tgt_type.clone(),
            user: load.user.clone().unwrap_or_else(|| "root".to_string()),
            start_time: jid_to_time(jid),
            end_time: None,
        }
    }
}
