use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Replace `path` with `bytes` so readers see either the old file or the
/// complete new one.
///
/// The temp file lives next to the destination with a leading `.`, which
/// result walks skip.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path)?;

    let written = write_and_sync(&tmp_path, bytes).await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| format!("Failed to rename into {}", path.display()));
    }

    Ok(())
}

/// Like [`atomic_write`] but never replaces an existing file.
///
/// Returns `Ok(false)` when `path` already exists.
pub async fn atomic_create(path: &Path, bytes: &[u8]) -> Result<bool> {
    let tmp_path = temp_path_for(path)?;

    let written = write_and_sync(&tmp_path, bytes).await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    // link(2) fails with EEXIST instead of overwriting.
    let linked = tokio::fs::hard_link(&tmp_path, path).await;
    let _ = tokio::fs::remove_file(&tmp_path).await;
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to link into {}", path.display())),
    }
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("payload");
    Ok(parent.join(format!(".{}.{}.tmp", file_name, Uuid::now_v7())))
}

async fn write_and_sync(tmp_path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)
        .await
        .with_context(|| format!("Failed to create temporary file {}", tmp_path.display()))?;
    file.write_all(bytes)
        .await
        .context("Failed to write temporary file")?;
    file.sync_all()
        .await
        .context("Failed to sync temporary file")?;
    Ok(())
}
