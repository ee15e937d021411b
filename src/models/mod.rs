pub mod config;
pub mod invocation;
pub mod jid;
pub mod report;

pub use config::{load_config, CacheConfig, HashType};
pub use invocation::{Invocation, JobSummary};
pub use jid::{jid_to_time, JidGenerator, REQ_JID};
pub use report::{ReapReport, RecordOutcome, SaveLoadStatus, WorkerReport, WorkerReturn};
