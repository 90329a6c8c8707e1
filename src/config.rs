use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "PIXELSHARE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            login_path: default_login_path(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/".to_string()
}

fn default_user_agent() -> String {
    format!("pixelshare/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_login_path() -> String {
    "/auth/jwt/login".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_credential_slot")]
    pub credential_slot: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            credential_slot: default_credential_slot(),
        }
    }
}

fn default_credential_slot() -> String {
    crate::credentials::DEFAULT_SLOT.into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UploadConfig {
    #[serde(default)]
    pub preview_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    if !other.api.login_path.is_empty() {
        base.api.login_path = other.api.login_path;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }
    if !other.storage.credential_slot.is_empty() {
        base.storage.credential_slot = other.storage.credential_slot;
    }

    if other.upload.preview_dir.is_some() {
        base.upload.preview_dir = other.upload.preview_dir;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    if value.trim().is_empty() {
        return;
    }
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.login_path" => cfg.api.login_path = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "storage.credential_slot" => cfg.storage.credential_slot = value,
        "upload.preview_dir" => cfg.upload.preview_dir = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pixelshare").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Each test uses its own prefix so parallel tests never see each other's
    // environment.
    fn isolated(prefix: &str, file: Option<PathBuf>) -> LoadOptions {
        LoadOptions {
            config_file: file,
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(
            "PIXELSHARE_TEST_DEFAULTS",
            Some(dir.path().join("missing.yaml")),
        ))
        .unwrap();
        assert_eq!(cfg.api.base_url, "http://localhost:8000/");
        assert_eq!(cfg.api.timeout, Duration::from_secs(20));
        assert_eq!(cfg.api.login_path, "/auth/jwt/login");
        assert_eq!(cfg.storage.credential_slot, "token");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://api.example.test/\n  timeout: 5s\nstorage:\n  credential_slot: staging\n",
        )
        .unwrap();
        let cfg = load(isolated("PIXELSHARE_TEST_FILE", Some(path))).unwrap();
        assert_eq!(cfg.api.base_url, "https://api.example.test/");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.api.login_path, "/auth/jwt/login");
        assert_eq!(cfg.storage.credential_slot, "staging");
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("PIXELSHARE_TEST_ENV_API__BASE_URL", "https://env.example.test/");
        env::set_var("PIXELSHARE_TEST_ENV_API__TIMEOUT", "3s");
        let cfg = load(isolated(
            "PIXELSHARE_TEST_ENV",
            Some(dir.path().join("missing.yaml")),
        ))
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://env.example.test/");
        assert_eq!(cfg.api.timeout, Duration::from_secs(3));
        env::remove_var("PIXELSHARE_TEST_ENV_API__BASE_URL");
        env::remove_var("PIXELSHARE_TEST_ENV_API__TIMEOUT");
    }

    #[test]
    fn bad_timeout_in_env_is_ignored() {
        let dir = tempdir().unwrap();
        env::set_var("PIXELSHARE_TEST_BADENV_API__TIMEOUT", "soon");
        let cfg = load(isolated(
            "PIXELSHARE_TEST_BADENV",
            Some(dir.path().join("missing.yaml")),
        ))
        .unwrap();
        assert_eq!(cfg.api.timeout, Duration::from_secs(20));
        env::remove_var("PIXELSHARE_TEST_BADENV_API__TIMEOUT");
    }
}
