use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Digest used to shard job ids into `<shard>/<leaf>` directories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cachedir")]
    pub cachedir: PathBuf,
    #[serde(default)]
    pub hash_type: HashType,
    /// Retention window in hours. 0 disables reaping.
    #[serde(default = "default_keep_jobs")]
    pub keep_jobs: u64,
    #[serde(default)]
    pub job_cache_store_endtime: bool,
    #[serde(default = "default_max_jid_attempts")]
    pub max_jid_attempts: u32,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    /// Append `_<pid>` to generated job ids.
    #[serde(default)]
    pub unique_jid: bool,
    /// Functions treated as status-polling noise by filtered listings.
    #[serde(default = "default_polling_functions")]
    pub polling_functions: Vec<String>,
}

fn default_cachedir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("job-cache")
}

fn default_keep_jobs() -> u64 {
    24
}

fn default_max_jid_attempts() -> u32 {
    128
}

fn default_read_retries() -> u32 {
    5
}

fn default_polling_functions() -> Vec<String> {
    vec!["util.find_job".to_string()]
}

impl CacheConfig {
    /// Default configuration rooted at `cachedir`.
    pub fn with_cachedir(cachedir: impl Into<PathBuf>) -> Self {
        Self {
            cachedir: cachedir.into(),
            ..Self::default()
        }
    }

    pub fn is_polling_function(&self, fun: &str) -> bool {
        self.polling_functions.iter().any(|f| f == fun)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cachedir: default_cachedir(),
            hash_type: HashType::default(),
            keep_jobs: default_keep_jobs(),
            job_cache_store_endtime: false,
            max_jid_attempts: default_max_jid_attempts(),
            read_retries: default_read_retries(),
            unique_jid: false,
            polling_functions: default_polling_functions(),
        }
    }
}

/// Load configuration.
///
/// Resolution order: explicit path, `JCACHE_CONFIG_DIR/config.json`, the
/// platform config dir, then defaults. `JCACHE_CACHE_DIR` overrides the
/// cache root in every case.
pub fn load_config(config_path: Option<&Path>) -> Result<CacheConfig> {
    let mut config = match find_config_file(config_path)? {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: CacheConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            tracing::debug!("Loaded config from: {}", path.display());
            config
        }
        None => CacheConfig::default(),
    };

    if let Ok(dir) = std::env::var("JCACHE_CACHE_DIR") {
        if !dir.trim().is_empty() {
            config.cachedir = PathBuf::from(dir);
        }
    }

    Ok(config)
}

fn find_config_file(config_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("JCACHE_CONFIG_DIR") {
        let path = PathBuf::from(config_dir).join("config.json");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("job-cache").join("config.json");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}
