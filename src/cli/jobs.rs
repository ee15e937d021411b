// CLI job record commands: prep-jid, save-load, return, get-load, get-jid, endtime

use chrono::Utc;

use super::{print_json, read_json_input};
use crate::errors::CacheError;
use crate::models::{Invocation, RecordOutcome, SaveLoadStatus, WorkerReport};
use crate::storage::JobCache;

/// jcache prep-jid
pub async fn cmd_prep_jid(
    cache: &dyn JobCache,
    jid: Option<&str>,
    nocache: bool,
) -> anyhow::Result<()> {
    let jid = cache.prep_jid(jid, nocache).await?;
    println!("{}", jid);
    Ok(())
}

/// jcache save-load
pub async fn cmd_save_load(cache: &dyn JobCache, jid: &str, file: &str) -> anyhow::Result<()> {
    let raw = read_json_input(file).await?;
    let mut load: Invocation = serde_json::from_value(raw)
        .map_err(|e| anyhow::anyhow!("Invalid invocation record: {}", e))?;
    if load.jid.is_empty() {
        load.jid = jid.to_string();
    }

    match cache.save_load(jid, &load).await {
        SaveLoadStatus::Saved => println!("Saved invocation for job {}", jid),
        SaveLoadStatus::SavedWithoutTargets => {
            println!("Saved invocation for job {} (target snapshot unavailable)", jid)
        }
        SaveLoadStatus::AlreadySaved => {
            println!("Invocation for job {} already recorded, left unchanged", jid)
        }
        SaveLoadStatus::NotSaved => {
            anyhow::bail!("Could not save invocation for job {}", jid);
        }
    }
    Ok(())
}

/// jcache return
pub async fn cmd_return(cache: &dyn JobCache, file: &str) -> anyhow::Result<()> {
    let raw = read_json_input(file).await?;
    let report: WorkerReport =
        serde_json::from_value(raw).map_err(|e| anyhow::anyhow!("Invalid worker report: {}", e))?;

    let outcome = cache.returner(report).await?;
    print_json(&outcome)?;
    match outcome {
        RecordOutcome::Recorded { .. } | RecordOutcome::NoCache { .. } => Ok(()),
        RecordOutcome::ReplayRejected { jid, worker } => {
            anyhow::bail!("Worker {} already returned for job {}", worker, jid)
        }
        RecordOutcome::InconsistentJob { jid, .. } => {
            anyhow::bail!("Job {} is not present in the cache", jid)
        }
    }
}

/// jcache get-load
pub async fn cmd_get_load(cache: &dyn JobCache, jid: &str) -> anyhow::Result<()> {
    match cache.get_load(jid).await? {
        Some(load) => print_json(&load),
        None => Err(CacheError::NotFound(format!("No invocation recorded for job {}", jid)).into()),
    }
}

/// jcache get-jid
pub async fn cmd_get_jid(cache: &dyn JobCache, jid: &str) -> anyhow::Result<()> {
    let returns = cache.get_jid(jid).await?;
    print_json(&returns)
}

/// jcache endtime set
pub async fn cmd_endtime_set(
    cache: &dyn JobCache,
    jid: &str,
    time: Option<&str>,
) -> anyhow::Result<()> {
    let time = match time {
        Some(t) => t.to_string(),
        None => Utc::now().format("%Y, %b %d %H:%M:%S%.6f").to_string(),
    };
    if !cache.update_endtime(jid, &time).await {
        anyhow::bail!("Could not store end time for job {}", jid);
    }
    println!("{}", time);
    Ok(())
}

/// jcache endtime get
pub async fn cmd_endtime_get(cache: &dyn JobCache, jid: &str) -> anyhow::Result<()> {
    match cache.get_endtime(jid).await? {
        Some(time) => {
            println!("{}", time);
            Ok(())
        }
        None => Err(CacheError::NotFound(format!("No end time recorded for job {}", jid)).into()),
    }
}
