//! Configuration for rulegen runs.
//!
//! Configuration lives in a TOML file (default `rulegen.toml` in the working
//! directory). Every field has a default, so a missing file or a partial file
//! is valid; a malformed file is an error.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [paths]
//! instructions = "mdc-instructions.txt"
//! libraries = "libraries.json"
//! output_dir = "rules-mdc"
//! progress_file = "mdc_generation_progress.jsonl"
//! research_dir = "research"
//!
//! [api]
//! model = "gemini-2.0-flash"
//! api_key_env = "RULEGEN_API_KEY"
//! rate_limit_calls = 2000
//! rate_limit_period_secs = 60
//! max_attempts = 3
//! retry_min_wait_secs = 4
//! retry_max_wait_secs = 10
//!
//! [processing]
//! max_workers = 4
//! chunk_size = 50000
//!
//! [research]
//! enabled = true
//! endpoint = "https://api.exa.ai/answer"
//! api_key_env = "EXA_API_KEY"
//! ```
//!
//! ## Loading
//!
//! ```rust,no_run
//! use rulegen_core::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("rulegen.toml"))?;
//! config.validate()?;
//! println!("{} workers", config.processing.max_workers);
//! # Ok::<(), rulegen_core::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;
use crate::retry::{DEFAULT_TRANSIENT_STATUSES, RetryPolicy, StatusClassifier};
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "rulegen.toml";

/// Longest accepted period, timeout or backoff, in seconds (one day).
const MAX_PERIOD_SECS: u64 = 86_400;
const MAX_RATE_LIMIT_CALLS: u64 = 1_000_000;
const MAX_ATTEMPTS: u64 = 100;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input and output locations.
    pub paths: PathsConfig,
    /// Generation service settings.
    pub api: ApiConfig,
    /// Worker pool and chunking settings.
    pub processing: ProcessingConfig,
    /// Research step run before generation.
    pub research: ResearchConfig,
}

/// File system locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Rule-writing instructions included in every prompt.
    pub instructions: PathBuf,
    /// Library catalog (`{category: {subcategory: [library]}}`).
    pub libraries: PathBuf,
    /// Root directory for generated `.mdc` files.
    pub output_dir: PathBuf,
    /// Progress log.
    pub progress_file: PathBuf,
    /// Per-library research: hand-written `<slug>.md` notes and fetched
    /// `<slug>.json` results.
    pub research_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            instructions: PathBuf::from("mdc-instructions.txt"),
            libraries: PathBuf::from("libraries.json"),
            output_dir: PathBuf::from("rules-mdc"),
            progress_file: PathBuf::from("mdc_generation_progress.jsonl"),
            research_dir: PathBuf::from("research"),
        }
    }
}

/// Generation service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Calls allowed per rate limit period.
    pub rate_limit_calls: u32,
    /// Rate limit period in seconds.
    pub rate_limit_period_secs: u64,
    /// Attempts per chunk, including the first.
    #[serde(alias = "max_retries")]
    pub max_attempts: u32,
    /// Lower bound of the backoff between attempts, in seconds.
    pub retry_min_wait_secs: u64,
    /// Upper bound of the backoff between attempts, in seconds.
    pub retry_max_wait_secs: u64,
    /// HTTP statuses treated as transient.
    pub transient_statuses: Vec<u16>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
                .to_string(),
            api_key_env: "RULEGEN_API_KEY".to_string(),
            request_timeout_secs: 120,
            rate_limit_calls: 2000,
            rate_limit_period_secs: 60,
            max_attempts: 3,
            retry_min_wait_secs: 4,
            retry_max_wait_secs: 10,
            transient_statuses: DEFAULT_TRANSIENT_STATUSES.to_vec(),
        }
    }
}

impl ApiConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::Config(format!(
                "API key not set: export {} before running",
                self.api_key_env
            ))),
        }
    }
}

/// Worker pool and chunking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Concurrent workers.
    pub max_workers: usize,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap for character-window splits.
    pub chunk_overlap: usize,
    /// Chunks of one job generated concurrently.
    pub chunk_concurrency: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            chunk_size: 50_000,
            chunk_overlap: 200,
            chunk_concurrency: 1,
        }
    }
}

/// Research service settings.
///
/// The step is skipped, with a warning, when the key variable is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Fetch research for libraries with no cached result.
    pub enabled: bool,
    /// Answer endpoint URL.
    pub endpoint: String,
    /// Environment variable holding the research API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Libraries researched concurrently.
    pub concurrency: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.exa.ai/answer".to_string(),
            api_key_env: "EXA_API_KEY".to_string(),
            request_timeout_secs: 60,
            concurrency: 4,
        }
    }
}

impl ResearchConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The research API key, or `None` when the variable is unset or empty.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or contains
    /// invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config: {e}")))
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        let api = &self.api;
        let processing = &self.processing;

        if processing.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if processing.chunk_concurrency == 0 {
            return Err(Error::Config("chunk_concurrency must be at least 1".into()));
        }
        if processing.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".into()));
        }
        if processing.chunk_overlap >= processing.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                processing.chunk_overlap, processing.chunk_size
            )));
        }
        if api.rate_limit_calls == 0 {
            return Err(Error::Config("rate_limit_calls must be at least 1".into()));
        }
        if api.rate_limit_period_secs == 0 {
            return Err(Error::Config("rate_limit_period_secs must be at least 1".into()));
        }
        if api.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if api.retry_min_wait_secs > api.retry_max_wait_secs {
            return Err(Error::Config(format!(
                "retry_min_wait_secs ({}) exceeds retry_max_wait_secs ({})",
                api.retry_min_wait_secs, api.retry_max_wait_secs
            )));
        }
        if api.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be at least 1".into()));
        }
        check_upper("rate_limit_calls", u64::from(api.rate_limit_calls), MAX_RATE_LIMIT_CALLS)?;
        check_upper("rate_limit_period_secs", api.rate_limit_period_secs, MAX_PERIOD_SECS)?;
        check_upper("retry_max_wait_secs", api.retry_max_wait_secs, MAX_PERIOD_SECS)?;
        check_upper("request_timeout_secs", api.request_timeout_secs, MAX_PERIOD_SECS)?;
        check_upper("max_attempts", u64::from(api.max_attempts), MAX_ATTEMPTS)?;
        if api.endpoint.trim().is_empty() {
            return Err(Error::Config("api endpoint must not be empty".into()));
        }

        let research = &self.research;
        if research.enabled {
            if research.concurrency == 0 {
                return Err(Error::Config("research concurrency must be at least 1".into()));
            }
            if research.request_timeout_secs == 0 {
                return Err(Error::Config(
                    "research request_timeout_secs must be at least 1".into(),
                ));
            }
            check_upper(
                "research request_timeout_secs",
                research.request_timeout_secs,
                MAX_PERIOD_SECS,
            )?;
            if research.endpoint.trim().is_empty() {
                return Err(Error::Config("research endpoint must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Rate limit budget.
    #[must_use]
    pub const fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.api.rate_limit_calls,
            Duration::from_secs(self.api.rate_limit_period_secs),
        )
    }

    /// Retry bounds.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.api.max_attempts,
            Duration::from_secs(self.api.retry_min_wait_secs),
            Duration::from_secs(self.api.retry_max_wait_secs),
        )
    }

    /// The explicit configuration value handed to the scheduler.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.processing.max_workers,
            rate_limit: self.rate_limit(),
            retry: self.retry_policy(),
            max_chunk_size: self.processing.chunk_size,
            chunk_overlap: self.processing.chunk_overlap,
            chunk_concurrency: self.processing.chunk_concurrency,
            classifier: Arc::new(StatusClassifier::new(self.api.transient_statuses.clone())),
        }
    }
}

fn check_upper(key: &str, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::Config(format!("{key} ({value}) must be at most {max}")));
    }
    Ok(())
}
