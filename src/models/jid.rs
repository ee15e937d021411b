use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Placeholder id sent by workers reporting a job nobody dispatched.
pub const REQ_JID: &str = "req";

const JID_FORMAT: &str = "%Y%m%d%H%M%S%6f";
const JID_DIGITS: usize = 20;

/// Render a timestamp as a 20-digit job id.
pub fn format_jid(at: DateTime<Utc>) -> String {
    at.format(JID_FORMAT).to_string()
}

/// Human-readable start time encoded in a timestamp job id.
///
/// Returns `None` for ids that were not produced by [`JidGenerator`]
/// (externally supplied ids are opaque).
pub fn jid_to_time(jid: &str) -> Option<String> {
    let digits = jid.get(..JID_DIGITS)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = &jid[JID_DIGITS..];
    if !rest.is_empty() && !rest.starts_with('_') {
        return None;
    }

    let seconds = NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S").ok()?;
    let micros: i64 = digits[14..].parse().ok()?;
    let at = seconds + Duration::microseconds(micros);
    Some(at.format("%Y, %b %d %H:%M:%S%.6f").to_string())
}

/// Produces strictly increasing timestamp job ids within one process.
#[derive(Debug)]
pub struct JidGenerator {
    last_micros: Mutex<i64>,
    pid_suffix: Option<u32>,
}

impl JidGenerator {
    pub fn new(unique_jid: bool) -> Self {
        Self {
            last_micros: Mutex::new(0),
            pid_suffix: unique_jid.then(std::process::id),
        }
    }

    /// Continue a sequence: every id issued sorts after `last`.
    pub fn resume_after(last: DateTime<Utc>, unique_jid: bool) -> Self {
        Self {
            last_micros: Mutex::new(last.timestamp_micros()),
            pid_suffix: unique_jid.then(std::process::id),
        }
    }

    pub fn next_jid(&self) -> String {
        let now = Utc::now();
        let micros = {
            let mut last = self
                .last_micros
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let candidate = now.timestamp_micros().max(*last + 1);
            *last = candidate;
            candidate
        };
        let at = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or(now);
        match self.pid_suffix {
            Some(pid) => format!("{}_{}", format_jid(at), pid),
            None => format_jid(at),
        }
    }
}
