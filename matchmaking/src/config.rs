//! Engine configuration.
//!
//! Every section is defaulted, so an empty TOML file is a valid config.
//! Environment variables override a handful of deployment-specific values:
//!
//! | variable                      | field                       |
//! |-------------------------------|-----------------------------|
//! | `MATCHMAKING_MODEL_URL`       | `model.endpoint.base_url`   |
//! | `MATCHMAKING_MODEL_NAME`      | `model.settings.model`      |
//! | `MATCHMAKING_API_KEY`         | `model.endpoint.api_key`    |
//! | `MATCHMAKING_RATE_PER_MINUTE` | `rate_limit.per_minute`     |
//! | `MATCHMAKING_MAX_CONCURRENT`  | `batch.max_concurrent`      |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::batch::{BatchConfig, BatchProcessor, MAX_VALIDITY_DAYS};
use crate::cache::{CacheBackend, CacheError, EntityCache, MemoryBackend};
use crate::debate::{DebateConfig, DebateEngine, EscalationSink};
use crate::error::EngineResult;
use crate::events::EventBus;
use crate::model::{EndpointConfig, ModelClient, ModelSettings, PromptRegistry, RetryPolicy};
use crate::pipeline::{FilterConfig, MatchPipeline, ScoringConfig};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::scheduler::{EntitySource, Scheduler, SchedulerConfig};

/// Model-call backoff settings.
pub type RetryConfig = RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens per rolling minute. Every model call attempt takes one, and so
    /// does every pair dispatch, so model calls never exceed this rate.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { per_minute: 60 }
    }
}

impl RateLimitConfig {
    pub fn build(&self) -> Result<RateLimiter, RateLimitError> {
        RateLimiter::per_minute(self.per_minute)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: EndpointConfig,
    pub settings: ModelSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Rocks,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Database directory for the `rocks` backend.
    pub path: Option<PathBuf>,
    /// Drop invalidated and expired entries when the cache opens.
    pub purge_on_open: bool,
}

impl CacheConfig {
    pub fn open(&self) -> Result<EntityCache, CacheError> {
        let backend: Arc<dyn CacheBackend> = match self.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::Rocks => self.open_rocks()?,
        };
        let cache = EntityCache::new(backend)?;
        if self.purge_on_open {
            let purged = cache.purge_dead()?;
            debug!(purged, "purged dead cache entries on open");
        }
        Ok(cache)
    }

    #[cfg(feature = "persistent-cache")]
    fn open_rocks(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| CacheError::Backend("rocks backend needs cache.path".into()))?;
        Ok(Arc::new(crate::cache::RocksBackend::open(path)?))
    }

    #[cfg(not(feature = "persistent-cache"))]
    fn open_rocks(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        Err(CacheError::Backend(
            "rocks backend requires the persistent-cache feature".into(),
        ))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rate_limit: RateLimitConfig,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub debate: DebateConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub filter: FilterConfig,
    pub scoring: ScoringConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Parse, without environment overrides or validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from an optional file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MATCHMAKING_MODEL_URL") {
            self.model.endpoint.base_url = url;
        }
        if let Some(model) = lookup("MATCHMAKING_MODEL_NAME") {
            self.model.settings.model = model;
        }
        if let Some(key) = lookup("MATCHMAKING_API_KEY") {
            self.model.endpoint.api_key = key;
        }
        if let Some(value) = lookup("MATCHMAKING_RATE_PER_MINUTE") {
            self.rate_limit.per_minute = parse_env("MATCHMAKING_RATE_PER_MINUTE", value)?;
        }
        if let Some(value) = lookup("MATCHMAKING_MAX_CONCURRENT") {
            self.batch.max_concurrent = parse_env("MATCHMAKING_MAX_CONCURRENT", value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        };

        if self.rate_limit.per_minute == 0 {
            return invalid("rate_limit.per_minute must be > 0");
        }
        if self.batch.max_concurrent == 0 {
            return invalid("batch.max_concurrent must be > 0");
        }
        if !(1..=MAX_VALIDITY_DAYS).contains(&self.batch.validity_days) {
            return invalid(&format!(
                "batch.validity_days must be within 1..={MAX_VALIDITY_DAYS}"
            ));
        }
        if self.debate.max_iterations == 0 {
            return invalid("debate.max_iterations must be > 0");
        }
        if !(0.0..=100.0).contains(&self.debate.disagreement_threshold) {
            return invalid("debate.disagreement_threshold must be within 0..=100");
        }
        if !(0.0..=1.0).contains(&self.debate.min_confidence)
            || !(0.0..=1.0).contains(&self.debate.confidence_gap)
        {
            return invalid("debate confidences must be within 0..=1");
        }
        if self.debate.call_timeout_secs == 0 || self.debate.debate_timeout_secs == 0 {
            return invalid("debate timeouts must be > 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be > 0");
        }
        if !self.scoring.ensemble.is_valid() {
            return invalid("scoring.ensemble weights must be non-negative and not all zero");
        }
        let attrs = &self.scoring.attributes;
        if attrs.strategy + attrs.geography + attrs.size <= 0.0 {
            return invalid("scoring.attributes weights must not all be zero");
        }
        if self.scoring.top_n == Some(0) {
            return invalid("scoring.top_n must be > 0 when set");
        }
        if self.cache.backend == CacheBackendKind::Rocks && self.cache.path.is_none() {
            return invalid("cache.path is required for the rocks backend");
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Wire a scheduler over the given collaborators.
    ///
    /// Opens the configured cache; the model client, entity source and
    /// escalation sink are supplied by the caller.
    pub fn build_scheduler(
        &self,
        client: Arc<dyn ModelClient>,
        source: Arc<dyn EntitySource>,
        escalations: Arc<dyn EscalationSink>,
        events: Option<EventBus>,
    ) -> EngineResult<Scheduler> {
        let mut cache = self.cache.open()?;
        if let Some(bus) = &events {
            cache = cache.with_events(bus.clone());
        }
        // One bucket gates both dispatches and every model call attempt.
        let limiter = Arc::new(self.rate_limit.build()?);
        let engine = DebateEngine::new(
            client,
            Arc::new(PromptRegistry::with_defaults()),
            self.debate.clone(),
        )
        .with_retry(self.retry)
        .with_settings(self.model.settings.clone())
        .with_rate_limiter(Arc::clone(&limiter));

        let mut processor = BatchProcessor::new(
            Arc::new(engine),
            limiter,
            Arc::new(cache),
            escalations,
            self.batch.clone(),
        )?;
        let pipeline = MatchPipeline::new(self.filter.clone(), self.scoring.clone());

        let scheduler = match &events {
            Some(bus) => {
                processor = processor.with_events(bus.clone());
                Scheduler::new(source, pipeline, processor, self.scheduler.clone())
                    .with_events(bus.clone())
            }
            None => Scheduler::new(source, pipeline, processor, self.scheduler.clone()),
        };
        debug!(cache = scheduler.cache().backend_name(), "scheduler assembled");
        Ok(scheduler)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
