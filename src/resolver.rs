//! Target expansion: turns a target expression into concrete worker ids.

use anyhow::Result;
use async_trait::async_trait;
use globset::Glob;
use serde_json::Value;

use crate::errors::CacheError;

#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn check_minions(&self, tgt: &Value, tgt_type: &str) -> Result<Vec<String>>;
}

/// Resolves targets against a fixed set of known worker ids.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    workers: Vec<String>,
}

impl StaticResolver {
    pub fn new<I, S>(workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workers: workers.into_iter().map(Into::into).collect(),
        }
    }

    fn match_glob(&self, tgt: &Value) -> Result<Vec<String>> {
        let pattern = tgt
            .as_str()
            .ok_or_else(|| CacheError::Validation("glob target must be a string".to_string()))?;
        let matcher = Glob::new(pattern).map_err(CacheError::from)?.compile_matcher();
        Ok(self
            .workers
            .iter()
            .filter(|w| matcher.is_match(w.as_str()))
            .cloned()
            .collect())
    }

    fn match_list(&self, tgt: &Value) -> Result<Vec<String>> {
        let wanted: Vec<String> = match tgt {
            Value::String(s) => s
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect(),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => {
                return Err(CacheError::Validation(
                    "list target must be a string or an array".to_string(),
                )
                .into())
            }
        };
        Ok(self
            .workers
            .iter()
            .filter(|w| wanted.contains(w))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TargetResolver for StaticResolver {
    async fn check_minions(&self, tgt: &Value, tgt_type: &str) -> Result<Vec<String>> {
        match tgt_type {
            "glob" => self.match_glob(tgt),
            "list" => self.match_list(tgt),
            other => Err(CacheError::Validation(format!("Unsupported target type: {}", other)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> StaticResolver {
        StaticResolver::new(["web1", "web2", "db1"])
    }

    #[tokio::test]
    async fn test_glob_star_matches_all() {
        let workers = resolver().check_minions(&json!("*"), "glob").await.expect("resolve");
        assert_eq!(workers, vec!["web1", "web2", "db1"]);
    }

    #[tokio::test]
    async fn test_glob_prefix() {
        let workers = resolver()
            .check_minions(&json!("web*"), "glob")
            .await
            .expect("resolve");
        assert_eq!(workers, vec!["web1", "web2"]);
    }

    #[tokio::test]
    async fn test_list_from_comma_string() {
        let workers = resolver()
            .check_minions(&json!("db1, web2,unknown"), "list")
            .await
            .expect("resolve");
        assert_eq!(workers, vec!["web2", "db1"]);
    }

    #[tokio::test]
    async fn test_list_from_array() {
        let workers = resolver()
            .check_minions(&json!(["web1"]), "list")
            .await
            .expect("resolve");
        assert_eq!(workers, vec!["web1"]);
    }

    #[tokio::test]
    async fn test_unsupported_target_type() {
        let err = resolver()
            .check_minions(&json!("G@os:linux"), "compound")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported target type"));
    }

    #[tokio::test]
    async fn test_glob_requires_string() {
        assert!(resolver().check_minions(&json!(42), "glob").await.is_err());
    }
}
