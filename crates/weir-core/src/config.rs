use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeirError};

/// Top-level Weir configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

/// Process supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Optional run-as identity for job child processes.
    #[serde(default)]
    pub user: Option<String>,
    /// Base directory for execution-scoped working directories.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            user: None,
            tmp_dir: default_tmp_dir(),
        }
    }
}

impl WorkerConfig {
    pub fn tmp_dir(&self) -> PathBuf {
        expand_home(&self.tmp_dir)
    }
}

/// Local resource store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding resource blobs.
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    pub fn root(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Cloud storage path synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Prefix for synthesized cloud paths, e.g. `gs://bucket/jobs`.
    #[serde(default = "default_cloud_prefix")]
    pub prefix: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            prefix: default_cloud_prefix(),
        }
    }
}

fn default_tmp_dir() -> String {
    "/tmp/weir".to_string()
}

fn default_storage_root() -> String {
    "~/.weir/resources".to_string()
}

fn default_cloud_prefix() -> String {
    "gs://weir".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeirError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeirError::Config(e.to_string()))
    }

    /// Load from a file when present, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.worker.user.is_none());
        assert_eq!(config.worker.tmp_dir, "/tmp/weir");
        assert_eq!(config.cloud.prefix, "gs://weir");
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("WEIR_TEST_PREFIX", "s3://jobs");
        let expanded = expand_env_vars("prefix = \"${WEIR_TEST_PREFIX}\"");
        assert_eq!(expanded, "prefix = \"s3://jobs\"");
        std::env::remove_var("WEIR_TEST_PREFIX");

        // Unset vars are kept verbatim
        let kept = expand_env_vars("${WEIR_DEFINITELY_UNSET_VAR}");
        assert_eq!(kept, "${WEIR_DEFINITELY_UNSET_VAR}");
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_home("~/.weir/resources"),
            PathBuf::from("/home/tester/.weir/resources")
        );
        assert_eq!(expand_home("/var/weir"), PathBuf::from("/var/weir"));
    }
}
