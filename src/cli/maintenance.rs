// CLI maintenance commands: list, clean

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::print_json;
use crate::models::{CacheConfig, JobSummary};
use crate::storage::{JobCache, LocalJobCache};

fn target_display(summary: &JobSummary) -> String {
    match &summary.target {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_table(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!(
        "{:<26} {:<24} {:<20} {:<10} START",
        "JID", "FUNCTION", "TARGET", "USER"
    );
    for job in jobs {
        println!(
            "{:<26} {:<24} {:<20} {:<10} {}",
            job.jid,
            job.function,
            target_display(job),
            job.user,
            job.start_time.as_deref().unwrap_or("-")
        );
    }
}

/// jcache list
pub async fn cmd_list(
    cache: &dyn JobCache,
    count: usize,
    all: bool,
    filter_polling: bool,
    json: bool,
) -> anyhow::Result<()> {
    let jobs: Vec<JobSummary> = if all {
        cache.get_jids().await?.into_values().collect()
    } else {
        cache.get_jids_filter(count, filter_polling).await?
    };

    if json {
        print_json(&jobs)
    } else {
        print_table(&jobs);
        Ok(())
    }
}

/// jcache clean
pub async fn cmd_clean(
    cache: &LocalJobCache,
    config: &CacheConfig,
    every: Option<u64>,
) -> anyhow::Result<()> {
    if config.keep_jobs == 0 {
        println!("Job retention is disabled (keep_jobs = 0), nothing to clean.");
        return Ok(());
    }

    let Some(secs) = every else {
        let report = cache.clean_old_jobs().await?;
        print_json(&report)?;
        return Ok(());
    };

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.notify_one();
        }
    });

    tracing::info!(
        "Cleaning jobs older than {} hours every {} seconds",
        config.keep_jobs,
        secs
    );
    cache
        .reaper()
        .run(Duration::from_secs(secs.max(1)), shutdown)
        .await;
    Ok(())
}
