//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{CmError, Result};
use crate::core::paths;

/// Full CleanMaster configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub incremental: IncrementalConfig,
    pub ai: AiConfig,
    pub cost: CostConfig,
    pub breaker: BreakerConfig,
    pub executor: ExecutorConfig,
    pub backup: BackupConfig,
    pub whitelist: WhitelistConfig,
    pub paths: PathsConfig,
}

/// Scanner pool behavior and traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Worker threads; 0 means `2 × available_parallelism`, clamped to [1, 32].
    pub thread_count: usize,
    /// Bounded capacity of the candidate stream.
    pub channel_capacity: usize,
    /// Wall-clock cap for one directory-size computation, in seconds.
    pub dir_size_wall_clock_secs: u64,
    /// File-count cap for one directory-size computation.
    pub dir_size_max_files: usize,
    /// Cancellation flag is polled every N files inside a directory.
    pub cancel_poll_granularity: usize,
    /// Directory names never descended into.
    pub exclude_globs: Vec<String>,
    /// Absolute path prefixes skipped entirely (system skip list).
    pub system_skip: Vec<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            channel_capacity: 1024,
            dir_size_wall_clock_secs: 30,
            dir_size_max_files: 10_000,
            cancel_poll_granularity: 64,
            exclude_globs: vec![
                "node_modules".to_string(),
                "__pycache__".to_string(),
                ".git".to_string(),
            ],
            system_skip: default_system_skip(),
        }
    }
}

#[cfg(windows)]
fn default_system_skip() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\Windows\System32"),
        PathBuf::from(r"C:\Windows\WinSxS"),
    ]
}

#[cfg(not(windows))]
fn default_system_skip() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/proc"),
        PathBuf::from("/sys"),
        PathBuf::from("/dev"),
        PathBuf::from("/boot"),
    ]
}

/// Incremental scan index behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IncrementalConfig {
    pub enabled: bool,
    /// Re-scanning the same root faster than this is a no-op.
    pub min_interval_secs: u64,
    /// Index document location; empty means the platform default.
    pub index_path: Option<PathBuf>,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_secs: 60,
            index_path: None,
        }
    }
}

/// LLM endpoint and model parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Bearer credential; normally supplied via `ANTHROPIC_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// Cost-control mode for LLM arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostControlMode {
    /// Always call.
    Unlimited,
    /// Reject calls past the caps.
    Budget,
    /// Past the caps, report "unavailable" so the arbiter uses rules.
    #[default]
    Fallback,
    /// Never call.
    RulesOnly,
}

/// Caps on LLM spending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostConfig {
    pub mode: CostControlMode,
    pub max_calls_per_scan: u32,
    /// USD-equivalent caps.
    pub max_budget_per_scan: f64,
    pub max_budget_per_day: f64,
    /// Maximum possible cost of one call; reserved up front.
    pub max_cost_per_call: f64,
    pub fallback_to_rules: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            mode: CostControlMode::Fallback,
            max_calls_per_scan: 100,
            max_budget_per_scan: 2.0,
            max_budget_per_day: 5.0,
            max_cost_per_call: 0.02,
            fallback_to_rules: true,
        }
    }
}

/// Circuit breaker and retry knobs for the LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,
    /// Seconds the circuit stays open before admitting one probe.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

/// Executor retry and abort behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// First hard failure ends the run with PartialSuccess.
    pub abort_on_error: bool,
    /// Bounded capacity of the progress channel.
    pub progress_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            abort_on_error: false,
            progress_capacity: 256,
        }
    }
}

/// Backup area and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup root; empty means the platform default.
    pub root: Option<PathBuf>,
    pub retention_days: u32,
    /// DEFLATE level for manifest ZIPs, 0-9.
    pub compression_level: u32,
    /// Keep at most this many manifest versions per profile.
    pub max_versions: Option<usize>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: None,
            retention_days: 7,
            compression_level: 6,
            max_versions: None,
        }
    }
}

/// Extra protected path prefixes merged into the built-in whitelist.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WhitelistConfig {
    pub protected_paths: Vec<PathBuf>,
}

/// File locations for durable state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub db_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cleanmaster")
                .join("config.toml"),
            db_path: paths::default_db_path(),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Resolution order for the config file path:
    /// 1. Explicit `path` argument (from `--config` CLI flag)
    /// 2. `CLEANMASTER_CONFIG` environment variable
    /// 3. Default path
    ///
    /// A missing file is only an error when the path was explicit.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_config = if path.is_none() {
            env::var_os("CLEANMASTER_CONFIG").map(PathBuf::from)
        } else {
            None
        };

        let path_buf = path.map_or_else(
            || env_config.clone().unwrap_or_else(Self::default_path),
            Path::to_path_buf,
        );
        let is_explicit_path = path.is_some() || env_config.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| CmError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(CmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective scanner parallelism after defaulting and clamping.
    #[must_use]
    pub fn effective_thread_count(&self) -> usize {
        let requested = if self.scanner.thread_count == 0 {
            std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
        } else {
            self.scanner.thread_count
        };
        requested.clamp(1, 32)
    }

    /// Effective backup root after defaulting.
    #[must_use]
    pub fn effective_backup_root(&self) -> PathBuf {
        self.backup
            .root
            .clone()
            .unwrap_or_else(paths::default_backup_root)
    }

    /// Effective incremental index path after defaulting.
    #[must_use]
    pub fn effective_index_path(&self) -> PathBuf {
        self.incremental
            .index_path
            .clone()
            .unwrap_or_else(paths::default_incremental_index_path)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(key) = env_var("ANTHROPIC_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = env_var("AI_MODEL") {
            self.ai.model = model;
        }
        set_env_u32("AI_MAX_TOKENS", &mut self.ai.max_tokens)?;
        set_env_f64("AI_TEMPERATURE", &mut self.ai.temperature)?;
        if let Some(raw) = env_var("CLEANMASTER_DB") {
            self.paths.db_path = PathBuf::from(raw);
        }
        if let Some(raw) = env_var("CLEANMASTER_BACKUP_ROOT") {
            self.backup.root = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.ai.temperature) {
            return Err(CmError::InvalidConfig {
                details: format!(
                    "ai.temperature must be in [0,1], got {}",
                    self.ai.temperature
                ),
            });
        }
        if self.backup.compression_level > 9 {
            return Err(CmError::InvalidConfig {
                details: format!(
                    "backup.compression_level must be 0-9, got {}",
                    self.backup.compression_level
                ),
            });
        }
        if self.cost.max_cost_per_call < 0.0
            || self.cost.max_budget_per_scan < 0.0
            || self.cost.max_budget_per_day < 0.0
        {
            return Err(CmError::InvalidConfig {
                details: "cost caps must be non-negative".to_string(),
            });
        }
        if self.scanner.channel_capacity == 0 {
            return Err(CmError::InvalidConfig {
                details: "scanner.channel_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_f64(name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<f64>().map_err(|error| CmError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_u32(name: &str, slot: &mut u32) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u32>().map_err(|error| CmError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cost.mode, CostControlMode::Fallback);
        assert_eq!(cfg.breaker.threshold, 5);
        assert_eq!(cfg.breaker.timeout_secs, 60);
        assert_eq!(cfg.executor.max_retries, 3);
        assert_eq!(cfg.backup.retention_days, 7);
        assert_eq!(cfg.ai.max_tokens, 8192);
    }

    #[test]
    fn thread_count_is_clamped() {
        let mut cfg = Config::default();
        cfg.scanner.thread_count = 500;
        assert_eq!(cfg.effective_thread_count(), 32);
        cfg.scanner.thread_count = 3;
        assert_eq!(cfg.effective_thread_count(), 3);
        cfg.scanner.thread_count = 0;
        let auto = cfg.effective_thread_count();
        assert!((1..=32).contains(&auto));
    }

    #[test]
    fn toml_round_trip_preserves_sections() {
        let cfg = Config::default();
        let raw = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            "[cost]\nmode = \"rules_only\"\nmax_calls_per_scan = 0\n",
        )
        .unwrap();
        assert_eq!(parsed.cost.mode, CostControlMode::RulesOnly);
        assert_eq!(parsed.cost.max_calls_per_scan, 0);
        assert_eq!(parsed.breaker.threshold, 5);
        assert_eq!(parsed.scanner.channel_capacity, 1024);
    }

    #[test]
    fn invalid_temperature_is_rejected() {
        let mut cfg = Config::default();
        cfg.ai.temperature = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(CmError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn invalid_compression_level_is_rejected() {
        let mut cfg = Config::default();
        cfg.backup.compression_level = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let missing = Path::new("/definitely/not/here/config.toml");
        let err = Config::load(Some(missing)).unwrap_err();
        assert_eq!(err.code(), "CM-1002");
    }

    #[test]
    fn exclude_globs_carry_well_known_directories() {
        let cfg = ScannerConfig::default();
        assert!(cfg.exclude_globs.iter().any(|g| g == "node_modules"));
        assert!(cfg.exclude_globs.iter().any(|g| g == "__pycache__"));
        assert!(cfg.exclude_globs.iter().any(|g| g == ".git"));
    }
}
