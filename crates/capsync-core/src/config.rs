//! Configuration module
//!
//! Settings for the durable store, the HTTP collaborator, the upload queue and
//! the image preprocessor. Every value has a default; `from_env` lets each one
//! be overridden through `CAPSYNC_*` environment variables (a `.env` file is
//! loaded first when present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::store_types::StoreBackend;

const DATA_DIR: &str = "./capsync-data";
const API_URL: &str = "http://localhost:8000";
const HTTP_TIMEOUT_SECS: u64 = 60;

const MAX_AUTO_ATTEMPTS: u32 = 6;
const INITIAL_BACKOFF_MS: u64 = 750;
const MAX_BACKOFF_MS: u64 = 30_000;
const BACKOFF_JITTER: f64 = 0.2;
const OFFLINE_POLL_MS: u64 = 1000;

const MAX_DIMENSION: u32 = 1600;
const MIN_DIMENSION: u32 = 640;
const MAX_BYTES: usize = 1_500_000;
const INITIAL_QUALITY: f32 = 0.86;
const MIN_QUALITY: f32 = 0.6;
const QUALITY_STEP: f32 = 0.08;
const RESIZE_STEP: f32 = 0.85;

/// Retry and scheduling policy of the upload queue.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueConfig {
    /// An intent whose retryable failure count would reach this value is parked as failed.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Fraction of the exponential delay added as random jitter.
    pub backoff_jitter: f64,
    /// Wake interval while connectivity reports offline.
    pub offline_poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_AUTO_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            backoff_jitter: BACKOFF_JITTER,
            offline_poll_interval_ms: OFFLINE_POLL_MS,
        }
    }
}

impl QueueConfig {
    pub fn offline_poll_interval(&self) -> Duration {
        Duration::from_millis(self.offline_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_attempts == 0 {
            anyhow::bail!("CAPSYNC_MAX_ATTEMPTS must be at least 1");
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            anyhow::bail!(
                "CAPSYNC_INITIAL_BACKOFF_MS ({}) must not exceed CAPSYNC_MAX_BACKOFF_MS ({})",
                self.initial_backoff_ms,
                self.max_backoff_ms
            );
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            anyhow::bail!("CAPSYNC_BACKOFF_JITTER must be between 0.0 and 1.0");
        }
        if self.offline_poll_interval_ms == 0 {
            anyhow::bail!("CAPSYNC_OFFLINE_POLL_MS must be greater than 0");
        }
        Ok(())
    }
}

/// Bounds applied by the image preprocessor.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    /// Longest edge of the output, in pixels.
    pub max_dimension: u32,
    /// Shrinking stops once the longest edge would drop below this.
    pub min_dimension: u32,
    /// Upper bound on the encoded size, in bytes.
    pub max_bytes: usize,
    pub initial_quality: f32,
    pub min_quality: f32,
    pub quality_step: f32,
    /// Scale factor applied to both edges when a quality sweep fails.
    pub resize_step: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            min_dimension: MIN_DIMENSION,
            max_bytes: MAX_BYTES,
            initial_quality: INITIAL_QUALITY,
            min_quality: MIN_QUALITY,
            quality_step: QUALITY_STEP,
            resize_step: RESIZE_STEP,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.min_dimension == 0 || self.min_dimension > self.max_dimension {
            anyhow::bail!(
                "CAPSYNC_MIN_DIMENSION must be between 1 and CAPSYNC_MAX_DIMENSION ({})",
                self.max_dimension
            );
        }
        if self.max_bytes == 0 {
            anyhow::bail!("CAPSYNC_MAX_BYTES must be greater than 0");
        }
        if !(self.min_quality > 0.0
            && self.min_quality <= self.initial_quality
            && self.initial_quality <= 1.0)
        {
            anyhow::bail!("Quality bounds must satisfy 0 < CAPSYNC_MIN_QUALITY <= CAPSYNC_INITIAL_QUALITY <= 1");
        }
        if self.quality_step <= 0.0 {
            anyhow::bail!("CAPSYNC_QUALITY_STEP must be greater than 0");
        }
        if !(self.resize_step > 0.0 && self.resize_step < 1.0) {
            anyhow::bail!("CAPSYNC_RESIZE_STEP must be strictly between 0 and 1");
        }
        Ok(())
    }
}

/// Top-level configuration for a capsync host.
#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub data_dir: PathBuf,
    pub api_url: String,
    pub http_timeout_secs: u64,
    pub demo_mode: bool,
    pub auto_verify: bool,
    pub admin_token: Option<String>,
    pub queue: QueueConfig,
    pub preprocess: PreprocessConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Local,
            data_dir: PathBuf::from(DATA_DIR),
            api_url: API_URL.to_string(),
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            demo_mode: false,
            auto_verify: true,
            admin_token: None,
            queue: QueueConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numeric values fall back
    /// to their defaults; an unknown store backend is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let defaults = Config::default();

        let store_backend = match lookup("CAPSYNC_STORE_BACKEND") {
            Some(value) => value.parse::<StoreBackend>()?,
            None => defaults.store_backend,
        };

        let queue = QueueConfig {
            max_attempts: parse_or(&lookup, "CAPSYNC_MAX_ATTEMPTS", MAX_AUTO_ATTEMPTS),
            initial_backoff_ms: parse_or(&lookup, "CAPSYNC_INITIAL_BACKOFF_MS", INITIAL_BACKOFF_MS),
            max_backoff_ms: parse_or(&lookup, "CAPSYNC_MAX_BACKOFF_MS", MAX_BACKOFF_MS),
            backoff_jitter: parse_or(&lookup, "CAPSYNC_BACKOFF_JITTER", BACKOFF_JITTER),
            offline_poll_interval_ms: parse_or(&lookup, "CAPSYNC_OFFLINE_POLL_MS", OFFLINE_POLL_MS),
        };

        let preprocess = PreprocessConfig {
            max_dimension: parse_or(&lookup, "CAPSYNC_MAX_DIMENSION", MAX_DIMENSION),
            min_dimension: parse_or(&lookup, "CAPSYNC_MIN_DIMENSION", MIN_DIMENSION),
            max_bytes: parse_or(&lookup, "CAPSYNC_MAX_BYTES", MAX_BYTES),
            initial_quality: parse_or(&lookup, "CAPSYNC_INITIAL_QUALITY", INITIAL_QUALITY),
            min_quality: parse_or(&lookup, "CAPSYNC_MIN_QUALITY", MIN_QUALITY),
            quality_step: parse_or(&lookup, "CAPSYNC_QUALITY_STEP", QUALITY_STEP),
            resize_step: parse_or(&lookup, "CAPSYNC_RESIZE_STEP", RESIZE_STEP),
        };

        let config = Config {
            store_backend,
            data_dir: lookup("CAPSYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_url: lookup("CAPSYNC_API_URL").unwrap_or(defaults.api_url),
            http_timeout_secs: parse_or(&lookup, "CAPSYNC_HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS),
            demo_mode: flag_or(&lookup, "CAPSYNC_DEMO", false),
            // Only an explicit "false" disables auto-verification.
            auto_verify: lookup("CAPSYNC_AUTO_VERIFY")
                .map(|v| !v.trim().eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            admin_token: lookup("CAPSYNC_ADMIN_TOKEN").filter(|t| !t.trim().is_empty()),
            queue,
            preprocess,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.api_url.is_empty() {
            anyhow::bail!("CAPSYNC_API_URL must not be empty");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("CAPSYNC_HTTP_TIMEOUT_SECS must be greater than 0");
        }
        self.queue.validate()?;
        self.preprocess.validate()?;
        Ok(())
    }

    /// Demo auto-verification needs demo mode, no explicit opt-out, and an admin token.
    pub fn auto_verify_token(&self) -> Option<&str> {
        if self.demo_mode && self.auto_verify {
            self.admin_token.as_deref()
        } else {
            None
        }
    }

    pub fn intents_dir(&self) -> PathBuf {
        self.data_dir.join("intents")
    }

    pub fn drafts_dir(&self) -> PathBuf {
        self.data_dir.join("drafts")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
