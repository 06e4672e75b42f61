//! Configuration management for the plume scheduler
//!
//! Configuration loads from a TOML file, from `PLUME_*` environment
//! variables, or both (environment wins). Window and pacing invariants are
//! validated once at startup; an invalid window is a fatal error, never a
//! silent fallback.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::window::PostingWindow;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Posting window and pacing rules
    pub posting: PostingConfig,

    /// Process-level runtime limits
    pub runtime: RuntimeConfig,

    /// Outbound platform API
    pub api: ApiConfig,

    /// Content generation collaborator
    pub generator: GeneratorConfig,

    /// Persistence
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Window, quota and spacing configuration
///
/// Hours use the extended 0-47 wheel: `hours_end = 26` means 02:00 the next
/// day. Intervals are the minimum/maximum spacing between consecutive
/// planned slots, distinct for the prime sub-window and the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub hours_start: u8,
    pub hours_end: u8,
    pub prime_start: u8,
    pub prime_end: u8,

    /// Daily target count is drawn uniformly from this range
    pub min_daily_posts: u32,
    pub max_daily_posts: u32,

    /// Hard ceiling on successful posts per day, enforced independently
    /// of the plan's target count
    pub max_posts_per_day: u32,

    /// Fraction of planned slots biased into the prime sub-window
    pub prime_bias: f64,

    pub prime_time_min_interval_secs: u64,
    pub prime_time_max_interval_secs: u64,
    pub other_time_min_interval_secs: u64,
    pub other_time_max_interval_secs: u64,

    /// IANA timezone name the whole schedule is computed in
    pub timezone: String,

    /// Base seed for plan generation; a process-random seed is drawn
    /// when unset
    pub plan_seed: Option<u64>,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            hours_start: 20,
            hours_end: 26,
            prime_start: 21,
            prime_end: 25,
            min_daily_posts: 3,
            max_daily_posts: 5,
            max_posts_per_day: 5,
            prime_bias: 0.7,
            prime_time_min_interval_secs: 1_800,
            prime_time_max_interval_secs: 3_600,
            other_time_min_interval_secs: 5_400,
            other_time_max_interval_secs: 10_800,
            timezone: String::from("Asia/Taipei"),
            plan_seed: None,
        }
    }
}

impl PostingConfig {
    /// Build the validated posting window
    pub fn window(&self) -> Result<PostingWindow> {
        PostingWindow::new(
            self.hours_start,
            self.hours_end,
            self.prime_start,
            self.prime_end,
        )
        .context("Invalid posting window configuration")
    }

    /// Parse the configured timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("Invalid timezone: {}", self.timezone))
    }

    /// Minimum slot spacing inside the prime sub-window, in minutes
    pub fn prime_min_gap_minutes(&self) -> u32 {
        (self.prime_time_min_interval_secs / 60) as u32
    }

    /// Maximum typical slot spacing inside the prime sub-window, in minutes
    pub fn prime_max_gap_minutes(&self) -> u32 {
        (self.prime_time_max_interval_secs / 60) as u32
    }

    /// Minimum slot spacing outside the prime sub-window, in minutes
    pub fn other_min_gap_minutes(&self) -> u32 {
        (self.other_time_min_interval_secs / 60) as u32
    }

    /// Maximum typical slot spacing outside the prime sub-window, in minutes
    pub fn other_max_gap_minutes(&self) -> u32 {
        (self.other_time_max_interval_secs / 60) as u32
    }
}

/// Runtime limits for the hosting process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Wall-clock execution budget in seconds; 0 means unbounded
    pub execution_budget_secs: u64,

    /// Poll granularity of the wait loop in seconds
    pub check_interval_secs: u64,

    /// Maximum publish attempts per slot, including the first
    pub max_publish_attempts: u32,

    /// Base delay for publish retry backoff
    pub retry_base_delay_ms: u64,

    /// Cap for publish retry backoff
    pub retry_max_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_budget_secs: 0,
            check_interval_secs: 60,
            max_publish_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    /// Execution budget as a duration, if bounded
    pub fn execution_budget(&self) -> Option<Duration> {
        if self.execution_budget_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.execution_budget_secs))
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Outbound platform API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub access_token: String,
    pub user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://graph.threads.net/v1.0"),
            access_token: String::new(),
            user_id: String::from("me"),
            request_timeout_secs: 30,
        }
    }
}

/// Content generation collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,

    /// Persona surface used to flavor the generation prompt
    pub persona_name: String,
    pub persona_interests: Vec<String>,

    /// Platform text length ceiling; longer output is truncated
    pub max_post_chars: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.openai.com/v1"),
            api_key: String::new(),
            model: String::from("gpt-4o-mini"),
            temperature: 0.7,
            max_tokens: 150,
            request_timeout_secs: 60,
            persona_name: String::from("plume"),
            persona_interests: vec![],
            max_post_chars: 500,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/plume.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = env_parse("PLUME_POSTING_HOURS_START") {
            self.posting.hours_start = v;
        }
        if let Some(v) = env_parse("PLUME_POSTING_HOURS_END") {
            self.posting.hours_end = v;
        }
        if let Some(v) = env_parse("PLUME_PRIME_START") {
            self.posting.prime_start = v;
        }
        if let Some(v) = env_parse("PLUME_PRIME_END") {
            self.posting.prime_end = v;
        }
        if let Some(v) = env_parse("PLUME_MIN_DAILY_POSTS") {
            self.posting.min_daily_posts = v;
        }
        if let Some(v) = env_parse("PLUME_MAX_DAILY_POSTS") {
            self.posting.max_daily_posts = v;
        }
        if let Some(v) = env_parse("PLUME_MAX_POSTS_PER_DAY") {
            self.posting.max_posts_per_day = v;
        }
        if let Some(v) = env_parse("PLUME_PRIME_TIME_MIN_INTERVAL") {
            self.posting.prime_time_min_interval_secs = v;
        }
        if let Some(v) = env_parse("PLUME_PRIME_TIME_MAX_INTERVAL") {
            self.posting.prime_time_max_interval_secs = v;
        }
        if let Some(v) = env_parse("PLUME_OTHER_TIME_MIN_INTERVAL") {
            self.posting.other_time_min_interval_secs = v;
        }
        if let Some(v) = env_parse("PLUME_OTHER_TIME_MAX_INTERVAL") {
            self.posting.other_time_max_interval_secs = v;
        }
        if let Ok(v) = std::env::var("PLUME_TIMEZONE") {
            self.posting.timezone = v;
        }
        if let Some(v) = env_parse("PLUME_PLAN_SEED") {
            self.posting.plan_seed = Some(v);
        }
        if let Some(v) = env_parse("PLUME_EXECUTION_BUDGET_SECS") {
            self.runtime.execution_budget_secs = v;
        }
        if let Some(v) = env_parse("PLUME_CHECK_INTERVAL_SECS") {
            self.runtime.check_interval_secs = v;
        }
        if let Some(v) = env_parse("PLUME_MAX_PUBLISH_ATTEMPTS") {
            self.runtime.max_publish_attempts = v;
        }
        if let Ok(v) = std::env::var("PLUME_ACCESS_TOKEN") {
            self.api.access_token = v;
        }
        if let Ok(v) = std::env::var("PLUME_USER_ID") {
            self.api.user_id = v;
        }
        if let Ok(v) = std::env::var("PLUME_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("PLUME_GENERATOR_API_KEY") {
            self.generator.api_key = v;
        }
        if let Ok(v) = std::env::var("PLUME_GENERATOR_ENDPOINT") {
            self.generator.endpoint = v;
        }
        if let Ok(v) = std::env::var("PLUME_SQLITE_PATH") {
            self.database.sqlite_path = v.into();
        }
        if let Ok(v) = std::env::var("PLUME_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("PLUME_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Validate configuration values
    ///
    /// Window, quota and spacing invariants are checked here; a failure is
    /// fatal and must prevent the execution loop from starting.
    pub fn validate(&self) -> Result<()> {
        self.posting.window()?;
        self.posting.tz()?;

        if self.posting.min_daily_posts > self.posting.max_daily_posts {
            anyhow::bail!(
                "min_daily_posts ({}) exceeds max_daily_posts ({})",
                self.posting.min_daily_posts,
                self.posting.max_daily_posts
            );
        }

        if self.posting.max_posts_per_day == 0 {
            anyhow::bail!("max_posts_per_day must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.posting.prime_bias) {
            anyhow::bail!(
                "prime_bias must be between 0.0 and 1.0, got {}",
                self.posting.prime_bias
            );
        }

        if self.posting.prime_time_min_interval_secs == 0
            || self.posting.other_time_min_interval_secs == 0
        {
            anyhow::bail!("interval floors must be greater than 0");
        }

        if self.posting.prime_time_min_interval_secs > self.posting.prime_time_max_interval_secs {
            anyhow::bail!("prime_time_min_interval exceeds prime_time_max_interval");
        }

        if self.posting.other_time_min_interval_secs > self.posting.other_time_max_interval_secs {
            anyhow::bail!("other_time_min_interval exceeds other_time_max_interval");
        }

        if self.generator.max_post_chars == 0 {
            anyhow::bail!("max_post_chars must be greater than 0");
        }

        if self.runtime.max_publish_attempts == 0 {
            anyhow::bail!("max_publish_attempts must be greater than 0");
        }

        Ok(())
    }
}
