//! Configuration types and loading
//!
//! Config precedence: CLI args > config file > defaults. The environment
//! only supplies the file location (`CONFIG_PATH`) and the API keys.
//! API keys come from the environment variables named in `api_key_envs` and
//! from `api_key_file`, never from the TOML itself.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{ApiKey, Secret};
use dispatch_pool::{DispatchConfig, RetryPolicy, ServiceTier, TierSelection};
use provider::TierModel;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub status: StatusConfig,
    /// Ordered credential list, resolved after parsing.
    #[serde(skip)]
    pub api_keys: Vec<ApiKey>,
}

/// Classification service settings
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Environment variables holding API keys, in credential order.
    #[serde(default = "default_api_key_envs")]
    pub api_key_envs: Vec<String>,
    /// File with one API key per line, appended after the env keys.
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            api_key_envs: default_api_key_envs(),
            api_key_file: None,
        }
    }
}

/// Per-tier overrides. Unset fields keep the tier's defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TierConfig {
    pub model: Option<String>,
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TiersConfig {
    #[serde(default)]
    pub pro: TierConfig,
    #[serde(default)]
    pub flash: TierConfig,
}

impl TiersConfig {
    fn tier(&self, tier: ServiceTier) -> &TierConfig {
        match tier {
            ServiceTier::Pro => &self.pro,
            ServiceTier::Flash => &self.flash,
        }
    }

    pub fn model(&self, tier: ServiceTier) -> String {
        self.tier(tier).model.clone().unwrap_or_else(|| {
            match tier {
                ServiceTier::Pro => "gemini-2.5-pro",
                ServiceTier::Flash => "gemini-2.5-flash",
            }
            .to_string()
        })
    }

    pub fn requests_per_minute(&self, tier: ServiceTier) -> u32 {
        self.tier(tier).requests_per_minute.unwrap_or(match tier {
            ServiceTier::Pro => 5,
            ServiceTier::Flash => 10,
        })
    }

    pub fn models(&self) -> Vec<TierModel> {
        ServiceTier::ALL
            .iter()
            .map(|tier| TierModel {
                tier: *tier,
                model: self.model(*tier),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> common::Result<RetryPolicy> {
        let backoff = self.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect();
        RetryPolicy::new(self.max_attempts, backoff).map_err(|e| common::Error::Config(e.to_string()))
    }
}

/// Where jobs come from and where results go.
#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Directory of `working_split_IN--{n}` / `working_split_OUT--API-{n}` pairs.
    pub base_dir: Option<PathBuf>,
    /// Side location for raw outputs, one subdirectory per output directory.
    /// Defaults to each job's output directory.
    pub raw_dir: Option<PathBuf>,
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
}

/// Resolved directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Single { input: PathBuf, output: PathBuf },
    Paired { base: PathBuf },
}

impl PathsConfig {
    pub fn layout(&self) -> common::Result<Layout> {
        match (&self.base_dir, &self.input_dir, &self.output_dir) {
            (Some(base), None, None) => Ok(Layout::Paired { base: base.clone() }),
            (None, Some(input), Some(output)) => Ok(Layout::Single {
                input: input.clone(),
                output: output.clone(),
            }),
            (Some(_), _, _) => Err(common::Error::Config(
                "paths.base_dir cannot be combined with input_dir/output_dir".into(),
            )),
            _ => Err(common::Error::Config(
                "paths needs either base_dir, or both input_dir and output_dir".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub mode: TierSelection,
    /// Start flash workers once every pro identity is exhausted (pro mode only).
    #[serde(default)]
    pub fallback_to_standard: bool,
    #[serde(default = "default_dequeue_margin")]
    pub dequeue_margin_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            mode: TierSelection::default(),
            fallback_to_standard: false,
            dequeue_margin_secs: default_dequeue_margin(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Serve /health, /status and /metrics here when set.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
    /// Write a Prometheus text snapshot here when the run ends.
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
            listen_addr: None,
            metrics_file: None,
        }
    }
}

fn default_base_url() -> String {
    provider::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_api_key_envs() -> Vec<String> {
    vec!["GEMINI_API_KEY".to_string()]
}

fn default_max_attempts() -> u32 {
    dispatch_pool::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_secs() -> Vec<u64> {
    dispatch_pool::retry::DEFAULT_BACKOFF
        .iter()
        .map(|d| d.as_secs())
        .collect()
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("ai_rules.txt")
}

fn default_dequeue_margin() -> u64 {
    5
}

fn default_report_interval() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, then resolve API keys.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| common::Error::io_at(path, e))?;
        let mut config = Self::parse(&contents)?;
        config.api_keys = config.resolve_api_keys()?;
        if config.api_keys.is_empty() {
            return Err(common::Error::Config(format!(
                "no API keys found; set one of {:?} or api_key_file",
                config.service.api_key_envs
            )));
        }
        Ok(config)
    }

    /// Parse and validate everything except the API keys.
    pub fn parse(contents: &str) -> common::Result<Self> {
        let config: Config = toml::from_str(contents)?;

        if !config.service.base_url.starts_with("http://")
            && !config.service.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.service.base_url
            )));
        }

        if config.service.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        for tier in ServiceTier::ALL {
            if config.tiers.requests_per_minute(tier) == 0 {
                return Err(common::Error::Config(format!(
                    "tiers.{tier}.requests_per_minute must be greater than 0"
                )));
            }
        }

        config.retry.policy()?;
        config.paths.layout()?;

        if config.status.report_interval_secs == 0 {
            return Err(common::Error::Config(
                "report_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Keys from `api_key_envs` in order, then from `api_key_file`.
    ///
    /// Unset or blank variables are skipped. File lines are trimmed; blank
    /// lines and `#` comments are ignored.
    fn resolve_api_keys(&self) -> common::Result<Vec<ApiKey>> {
        let mut keys = Vec::new();
        for name in &self.service.api_key_envs {
            if let Ok(value) = std::env::var(name) {
                let value = value.trim();
                if !value.is_empty() {
                    keys.push(Secret::new(value.to_owned()));
                }
            }
        }

        if let Some(ref key_file) = self.service.api_key_file {
            let contents = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            keys.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(|line| Secret::new(line.to_owned())),
            );
        }

        Ok(keys)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("batch-categorizer.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.status.report_interval_secs)
    }

    pub fn dispatch_config(&self) -> common::Result<DispatchConfig> {
        let requests_per_minute: BTreeMap<_, _> = ServiceTier::ALL
            .iter()
            .map(|tier| (*tier, self.tiers.requests_per_minute(*tier)))
            .collect();
        Ok(DispatchConfig {
            credentials: self.api_keys.len(),
            requests_per_minute,
            selection: self.dispatch.mode,
            fallback_to_standard: self.dispatch.fallback_to_standard,
            retry: self.retry.policy()?,
            dequeue_margin: Duration::from_secs(self.dispatch.dequeue_margin_secs),
        })
    }
}
