use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::datastore::rest::RestSettings;
use crate::datetime::resolve_timezone;
use crate::session::SessionOptions;
use crate::store::OptimisticPolicy;

const CONFIG_FILE: &str = "taskdeck.toml";
const CONFIG_ENV_VAR: &str = "TASKDECK_CONFIG";
const API_KEY_ENV_VAR: &str = "TASKDECK_API_KEY";
const URL_ENV_VAR: &str = "TASKDECK_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub remote: RemoteSection,
    pub store: StoreSection,
    pub time: TimeSection,

    #[serde(skip)]
    pub loaded_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            table: "tasks".to_string(),
            poll_interval_secs: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub rollback_on_failure: bool,
    pub queue_capacity: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            rollback_on_failure: true,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSection {
    pub timezone: Option<String>,
}

impl Config {
    /// Loads the first config file found, then applies environment
    /// overrides. Missing files fall back to defaults.
    #[tracing::instrument(skip(config_override))]
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match resolve_config_path(config_override) {
            Some(path) => {
                info!(config = %path.display(), "loading config");
                Self::load_file(&path)?
            }
            None => {
                warn!("no taskdeck.toml found; using defaults");
                Self::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str::<Self>(raw).context("failed to parse config TOML")
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        let path = expand_tilde(path);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        cfg.loaded_files.push(path);
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV_VAR)
            && !key.trim().is_empty()
        {
            debug!(var = API_KEY_ENV_VAR, "api key taken from environment");
            self.remote.api_key = Some(key.trim().to_string());
        }
        if let Ok(url) = std::env::var(URL_ENV_VAR)
            && !url.trim().is_empty()
        {
            debug!(var = URL_ENV_VAR, url = %url.trim(), "remote url taken from environment");
            self.remote.url = Some(url.trim().to_string());
        }
    }

    /// Applies `section.key=value` overrides on top of the loaded file.
    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).trim().to_string();
            let value = v.trim().to_string();
            debug!(key = %key, "applying override");
            match key.as_str() {
                "remote.url" => self.remote.url = non_empty(value),
                "remote.api_key" => self.remote.api_key = non_empty(value),
                "remote.table" => self.remote.table = value,
                "remote.poll_interval_secs" => {
                    self.remote.poll_interval_secs = parse_number(&key, &value)?;
                }
                "remote.timeout_secs" => {
                    self.remote.timeout_secs = parse_number(&key, &value)?;
                }
                "store.rollback_on_failure" => {
                    self.store.rollback_on_failure = parse_bool(&value);
                }
                "store.queue_capacity" => {
                    self.store.queue_capacity = parse_number(&key, &value)?;
                }
                "time.timezone" => self.time.timezone = non_empty(value),
                other => return Err(anyhow!("unknown config key: {other}")),
            }
        }
        Ok(())
    }

    pub fn rest_settings(&self) -> anyhow::Result<RestSettings> {
        let url = self.remote.url.clone().ok_or_else(|| {
            anyhow!("remote.url is not configured (set it in {CONFIG_FILE} or {URL_ENV_VAR})")
        })?;
        Ok(RestSettings {
            url,
            api_key: self.remote.api_key.clone(),
            table: self.remote.table.clone(),
            poll_interval: Duration::from_secs(self.remote.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.remote.timeout_secs.max(1)),
        })
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            policy: OptimisticPolicy {
                rollback_on_failure: self.store.rollback_on_failure,
            },
            queue_capacity: self.store.queue_capacity.max(1),
            ..SessionOptions::default()
        }
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        resolve_timezone(self.time.timezone.as_deref())
    }
}

#[tracing::instrument(skip(override_path))]
fn resolve_config_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path.to_path_buf());
    }

    if let Ok(raw) = std::env::var(CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if trimmed == "/dev/null" {
            return None;
        }
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut cursor = Some(cwd.as_path());
        while let Some(dir) = cursor {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            cursor = dir.parent();
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("taskdeck").join(CONFIG_FILE))
        .filter(|candidate| candidate.is_file())
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow!("{key} expects a number, got: {value}"))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}
