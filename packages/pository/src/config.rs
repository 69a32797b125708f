//! Layered configuration: built-in defaults, then the YAML file, then
//! `POSITORY_*` environment overrides.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pository/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Retention fields are accepted in config but no collector acts on them yet.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub keep_last_n: Option<u32>,
    pub max_age_days: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub data_root: PathBuf,
    pub log_path: PathBuf,
    pub port: u16,
    pub bind_address: String,
    pub tls: TlsConfig,
    pub retention: RetentionConfig,
    pub max_upload_size: u64,
    pub allowed_repos: Vec<String>,
    pub cors_origins: Vec<String>,
    pub admin_key: Option<String>,
    pub api_keys_path: PathBuf,
    /// Whether `/repo/...` downloads require a `read` credential. The `/apt`
    /// tree is always anonymous.
    pub download_auth: bool,
    pub oidc_audience: Option<String>,
    pub oidc_allowed_owners: Vec<String>,
    pub oidc_require_private: bool,
    pub oidc_overrides: HashMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/pository/data"),
            log_path: PathBuf::from("/var/lib/pository/logs/pository.log"),
            port: 3000,
            bind_address: String::from("0.0.0.0"),
            tls: TlsConfig::default(),
            retention: RetentionConfig::default(),
            max_upload_size: 100 * 1024 * 1024,
            allowed_repos: Vec::new(),
            cors_origins: Vec::new(),
            admin_key: None,
            api_keys_path: PathBuf::from("/var/lib/pository/api-keys.json"),
            download_auth: true,
            oidc_audience: None,
            oidc_allowed_owners: Vec::new(),
            oidc_require_private: false,
            oidc_overrides: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `$POSITORY_CONFIG` (or the default path) and
    /// apply environment overrides. A missing config file is not an error;
    /// the defaults stand in.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("POSITORY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_yaml(&raw).map_err(|source| ConfigError::Parse { path, source })?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("POSITORY_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("POSITORY_LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("POSITORY_PORT") {
            self.port = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "POSITORY_PORT",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("POSITORY_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Ok(v) = std::env::var("POSITORY_ADMIN_KEY") {
            self.admin_key = Some(v);
        }
        if let Ok(v) = std::env::var("POSITORY_API_KEYS_PATH") {
            self.api_keys_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("POSITORY_TLS_CERT") {
            self.tls.cert = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("POSITORY_TLS_KEY") {
            self.tls.key = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("POSITORY_MAX_UPLOAD_SIZE") {
            self.max_upload_size = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "POSITORY_MAX_UPLOAD_SIZE",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("POSITORY_CORS_ORIGINS") {
            self.cors_origins = split_list(&v);
        }
        Ok(())
    }

    /// Create the directories the service writes to: the data root, the log
    /// file's parent, and the key store's parent.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let mut dirs = vec![self.data_root.clone()];
        if let Some(parent) = self.log_path.parent() {
            dirs.push(parent.to_path_buf());
        }
        if let Some(parent) = self.api_keys_path.parent() {
            dirs.push(parent.to_path_buf());
        }
        for path in dirs {
            if path.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(&path)
                .map_err(|source| ConfigError::CreateDir { path, source })?;
        }
        Ok(())
    }

    pub fn repo_allowed(&self, repo: &str) -> bool {
        self.allowed_repos.is_empty() || self.allowed_repos.iter().any(|r| r == repo)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn defaults_when_yaml_empty() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_upload_size, 100 * 1024 * 1024);
        assert!(config.download_auth);
        assert!(config.allowed_repos.is_empty());
    }

    #[test]
    fn parses_recognized_keys() {
        let config = Config::from_yaml(indoc! {"
            dataRoot: /srv/pository
            port: 8080
            maxUploadSize: 1048576
            allowedRepos:
              - default
              - staging
            adminKey: super-secret
            retention:
              enabled: true
              keepLastN: 3
            oidcAudience: pository
            oidcAllowedOwners:
              - alice
            oidcOverrides:
              alice/tools:
                - '*'
        "})
        .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/pository"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_upload_size, 1_048_576);
        assert_eq!(config.allowed_repos, vec!["default", "staging"]);
        assert_eq!(config.admin_key.as_deref(), Some("super-secret"));
        assert_eq!(config.retention.keep_last_n, Some(3));
        assert_eq!(config.oidc_audience.as_deref(), Some("pository"));
        assert_eq!(config.oidc_overrides["alice/tools"], vec!["*"]);
    }

    #[test]
    fn repo_allow_list() {
        let mut config = Config::default();
        assert!(config.repo_allowed("anything"));
        config.allowed_repos = vec![String::from("default")];
        assert!(config.repo_allowed("default"));
        assert!(!config.repo_allowed("other"));
    }

    #[test]
    fn comma_separated_lists() {
        assert_eq!(
            split_list("https://a.example, https://b.example ,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(split_list("").is_empty());
    }
}
