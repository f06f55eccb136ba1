//! Configuration for the extraction pipeline.
//!
//! Every knob lives in one [`ExtractionConfig`] struct, built via its
//! builder or loaded from the environment with [`ExtractionConfig::from_env`].
//! Keeping the whole surface in one place makes it trivial to share across
//! tasks, log at startup, and diff two runs to understand why their
//! behaviour differs.
//!
//! The recognised environment variables mirror the deployment surface:
//! `ENVIRONMENT`, `ALLOW_DUMMY_DATA`, `FORCE_DUMMY_DATA`, `INFERENCE_URL`,
//! `INFERENCE_TIMEOUT_SECS`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::PagelensError;

/// Deployment environment. Controls the default for placeholder-data
/// permission and participates in the production safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Parse the `ENVIRONMENT` variable. Accepts the short spellings that
    /// show up in deployment scripts (`dev`, `prod`).
    pub fn parse(s: &str) -> Result<Self, PagelensError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            other => Err(PagelensError::InvalidConfig(format!(
                "unknown ENVIRONMENT '{other}' (expected development|testing|production)"
            ))),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
        };
        f.write_str(s)
    }
}

/// Configuration for rasterization and extraction orchestration.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::from_env()`].
///
/// # Example
/// ```rust
/// use pagelens::ExtractionConfig;
/// use std::time::Duration;
///
/// let config = ExtractionConfig::builder()
///     .scale_factor(4.0)
///     .infer_timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Uniform magnification applied to both page axes when rasterising.
    /// Default: 4.0. Higher fidelity for the vision model at the cost of a
    /// pixel buffer that grows with the square of the factor.
    pub scale_factor: f32,

    /// Per-call timeout for one inference request. Independent of retry
    /// delays. Default: 30 s.
    pub infer_timeout: Duration,

    /// How long `start_extraction` waits for page 0 to reach a terminal
    /// state before returning without a first-page result. Default: 10 s.
    pub first_page_timeout: Duration,

    /// Fixed pause between pages, a deliberate backpressure mechanism
    /// against the inference service. Default: 500 ms.
    pub inter_page_delay: Duration,

    /// Retry delays and per-class attempt budgets.
    pub backoff: BackoffPolicy,

    /// Base URL of the inference service (OpenAI-compatible vision endpoint).
    pub inference_url: String,

    /// Deployment environment.
    pub environment: Environment,

    /// Whether placeholder data may substitute for a failed extraction.
    /// Defaults to true outside production, false in production.
    pub allow_dummy_data: bool,

    /// Synthesize placeholder data for every page without calling the
    /// inference service at all. Development aid. Default: false.
    pub force_dummy_data: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            scale_factor: 4.0,
            infer_timeout: Duration::from_secs(30),
            first_page_timeout: Duration::from_secs(10),
            inter_page_delay: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
            inference_url: "http://127.0.0.1:8000".to_string(),
            environment: Environment::Development,
            allow_dummy_data: true,
            force_dummy_data: false,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
            allow_dummy_set: false,
        }
    }

    /// Load configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; `ALLOW_DUMMY_DATA` defaults
    /// to `true` outside production and `false` in production, so a
    /// production deployment must opt in explicitly (and will then be
    /// rejected by the fallback gate's startup validation).
    pub fn from_env() -> Result<Self, PagelensError> {
        let mut builder = Self::builder();

        if let Ok(env) = std::env::var("ENVIRONMENT") {
            builder = builder.environment(Environment::parse(&env)?);
        }
        if let Ok(url) = std::env::var("INFERENCE_URL") {
            builder = builder.inference_url(url);
        }
        if let Ok(secs) = std::env::var("INFERENCE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                PagelensError::InvalidConfig(format!(
                    "INFERENCE_TIMEOUT_SECS must be an integer, got '{secs}'"
                ))
            })?;
            builder = builder.infer_timeout(Duration::from_secs(secs));
        }
        if let Ok(v) = std::env::var("ALLOW_DUMMY_DATA") {
            builder = builder.allow_dummy_data(parse_bool("ALLOW_DUMMY_DATA", &v)?);
        }
        if let Ok(v) = std::env::var("FORCE_DUMMY_DATA") {
            builder = builder.force_dummy_data(parse_bool("FORCE_DUMMY_DATA", &v)?);
        }

        builder.build()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, PagelensError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(PagelensError::InvalidConfig(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
    allow_dummy_set: bool,
}

impl ExtractionConfigBuilder {
    pub fn scale_factor(mut self, scale: f32) -> Self {
        self.config.scale_factor = scale;
        self
    }

    pub fn infer_timeout(mut self, timeout: Duration) -> Self {
        self.config.infer_timeout = timeout;
        self
    }

    pub fn first_page_timeout(mut self, timeout: Duration) -> Self {
        self.config.first_page_timeout = timeout;
        self
    }

    pub fn inter_page_delay(mut self, delay: Duration) -> Self {
        self.config.inter_page_delay = delay;
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    pub fn inference_url(mut self, url: impl Into<String>) -> Self {
        self.config.inference_url = url.into();
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.config.environment = env;
        self
    }

    pub fn allow_dummy_data(mut self, allow: bool) -> Self {
        self.config.allow_dummy_data = allow;
        self.allow_dummy_set = true;
        self
    }

    pub fn force_dummy_data(mut self, force: bool) -> Self {
        self.config.force_dummy_data = force;
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Does not perform the production safety check — that belongs to
    /// [`crate::policy::FallbackGate::new`], which is constructed once at
    /// startup and refuses to exist in an unsafe configuration.
    pub fn build(mut self) -> Result<ExtractionConfig, PagelensError> {
        // Production defaults to no placeholder data unless explicitly set.
        if !self.allow_dummy_set && self.config.environment.is_production() {
            self.config.allow_dummy_data = false;
        }

        let c = &self.config;
        if !(c.scale_factor.is_finite() && c.scale_factor > 0.0) {
            return Err(PagelensError::InvalidConfig(format!(
                "scale_factor must be positive and finite, got {}",
                c.scale_factor
            )));
        }
        if c.infer_timeout.is_zero() {
            return Err(PagelensError::InvalidConfig(
                "infer_timeout must be non-zero".into(),
            ));
        }
        if c.backoff.not_ready_attempts == 0 || c.backoff.transient_attempts == 0 {
            return Err(PagelensError::InvalidConfig(
                "attempt budgets must be at least 1".into(),
            ));
        }
        Ok(self.config)
    }
}
