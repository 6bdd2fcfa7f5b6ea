/// Configuration management for Suggestion Service
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parse an environment variable with a default fallback.
fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Suggestion engine tuning
    pub engine: EngineConfig,
    /// Background job tuning
    pub jobs: JobsConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
    /// Shared secret expected in `x-service-token` on internal routes
    pub internal_service_token: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
    /// Min connections in pool
    pub min_connections: u32,
    /// Pool acquire timeout (seconds)
    pub acquire_timeout_sec: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Key prefix for cached display sets
    pub display_key_prefix: String,
    /// TTL for cached display sets (seconds)
    pub display_ttl_sec: u64,
}

/// Suggestion engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ranked suggestions persisted per user
    pub top_k: usize,
    /// Suggestions returned per display request
    pub display_count: usize,
    /// Upper bound on candidates evaluated per rebuild
    pub candidate_limit: i64,
    /// Budget for the inline rebuild on a user's first view (milliseconds)
    pub first_view_timeout_ms: u64,
    /// Drop candidates the user has a pending follow request towards
    pub exclude_pending_requests: bool,
    /// Concurrent candidate feature fetches per rebuild
    pub feature_concurrency: usize,
    /// Score formula constants
    pub scoring: ScoringParams,
    /// Display rotation constants
    pub rotation: RotationParams,
}

/// Constants of the multiplicative score formula.
///
/// Multipliers are capped before they enter the product, the product is
/// divided by `normalizer`, and the result is clamped to
/// `[min_score, max_score]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Neutral starting score
    pub base: f64,
    /// Per-unit weight of the recency-decayed activity signal
    pub recent_activity_weight: f64,
    /// Cap on the recent-activity multiplier
    pub recent_activity_cap: f64,
    /// Per-unit weight of lifetime activity (2x posts + photos)
    pub total_activity_weight: f64,
    /// Cap on the lifetime-activity multiplier
    pub total_activity_cap: f64,
    /// Per-mutual-friend weight
    pub mutual_friend_weight: f64,
    /// Per-shared-followee weight
    pub common_following_weight: f64,
    /// Per-shared-follower weight
    pub common_follower_weight: f64,
    /// Flat multiplier for public (non-private) accounts
    pub public_profile_multiplier: f64,
    /// Max boost for brand-new accounts, fading to zero at `new_account_age_days`
    pub new_account_max_boost: f64,
    /// Account age (days) past which the newness boost is gone
    pub new_account_age_days: i64,
    /// Divisor applied to the multiplier product
    pub normalizer: f64,
    /// Lower clamp of the final score
    pub min_score: f64,
    /// Upper clamp of the final score
    pub max_score: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            base: parse_env_with_default("SCORING_BASE", 0.5),
            recent_activity_weight: parse_env_with_default("SCORING_RECENT_ACTIVITY_WEIGHT", 0.1),
            recent_activity_cap: parse_env_with_default("SCORING_RECENT_ACTIVITY_CAP", 10.0),
            total_activity_weight: parse_env_with_default("SCORING_TOTAL_ACTIVITY_WEIGHT", 0.05),
            total_activity_cap: parse_env_with_default("SCORING_TOTAL_ACTIVITY_CAP", 3.0),
            mutual_friend_weight: parse_env_with_default("SCORING_MUTUAL_FRIEND_WEIGHT", 0.3),
            common_following_weight: parse_env_with_default("SCORING_COMMON_FOLLOWING_WEIGHT", 0.1),
            common_follower_weight: parse_env_with_default("SCORING_COMMON_FOLLOWER_WEIGHT", 0.05),
            public_profile_multiplier: parse_env_with_default("SCORING_PUBLIC_MULTIPLIER", 1.1),
            new_account_max_boost: parse_env_with_default("SCORING_NEW_ACCOUNT_MAX_BOOST", 0.1),
            new_account_age_days: parse_env_with_default("SCORING_NEW_ACCOUNT_AGE_DAYS", 30),
            normalizer: parse_env_with_default("SCORING_NORMALIZER", 3.0),
            min_score: parse_env_with_default("SCORING_MIN", 0.2),
            max_score: parse_env_with_default("SCORING_MAX", 0.9),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: parse_env_with_default("ENGINE_TOP_K", 30),
            display_count: parse_env_with_default("ENGINE_DISPLAY_COUNT", 4),
            candidate_limit: parse_env_with_default("ENGINE_CANDIDATE_LIMIT", 500),
            first_view_timeout_ms: parse_env_with_default("ENGINE_FIRST_VIEW_TIMEOUT_MS", 2000),
            exclude_pending_requests: parse_env_with_default(
                "ENGINE_EXCLUDE_PENDING_REQUESTS",
                false,
            ),
            feature_concurrency: parse_env_with_default("ENGINE_FEATURE_CONCURRENCY", 10),
            scoring: ScoringParams::default(),
            rotation: RotationParams::default(),
        }
    }
}

/// Constants of the display rotation priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationParams {
    /// Max penalty for a recently shown suggestion
    pub recency_penalty_max: f64,
    /// Hours after which the recency penalty fades to zero
    pub recency_window_hours: i64,
    /// Max penalty for a frequently shown suggestion
    pub frequency_penalty_max: f64,
    /// Show count at which the frequency penalty saturates
    pub frequency_saturation: i64,
    /// Priority floor below which entries leave the primary pool
    pub priority_floor: f64,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            recency_penalty_max: parse_env_with_default("ROTATION_RECENCY_PENALTY_MAX", 0.5),
            recency_window_hours: parse_env_with_default("ROTATION_RECENCY_WINDOW_HOURS", 24),
            frequency_penalty_max: parse_env_with_default("ROTATION_FREQUENCY_PENALTY_MAX", 0.3),
            frequency_saturation: parse_env_with_default("ROTATION_FREQUENCY_SATURATION", 10),
            priority_floor: parse_env_with_default("ROTATION_PRIORITY_FLOOR", 0.05),
        }
    }
}

/// Background job tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Rebuild worker tasks
    pub worker_count: usize,
    /// Bounded rebuild queue capacity
    pub queue_capacity: usize,
    /// Attempts per rebuild job before it is dropped
    pub max_attempts: u32,
    /// Base delay between retry attempts (milliseconds)
    pub retry_backoff_ms: u64,
    /// Interval of the periodic full recomputation sweep (seconds)
    pub periodic_interval_sec: u64,
    /// Affected followers enqueued per relationship change
    pub fanout_limit: usize,
    /// Cleanup job interval (seconds)
    pub cleanup_interval_sec: u64,
    /// Age after which an unrefreshed suggestion row is stale (hours)
    pub cleanup_staleness_hours: i64,
    /// Stale rows are only pruned when scored at or below this
    pub cleanup_stale_score_cutoff: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: parse_env_with_default("JOB_WORKER_COUNT", 4),
            queue_capacity: parse_env_with_default("JOB_QUEUE_CAPACITY", 1024),
            max_attempts: parse_env_with_default("JOB_MAX_ATTEMPTS", 3),
            retry_backoff_ms: parse_env_with_default("JOB_RETRY_BACKOFF_MS", 500),
            periodic_interval_sec: parse_env_with_default("JOB_PERIODIC_INTERVAL_SEC", 1800),
            fanout_limit: parse_env_with_default("JOB_FANOUT_LIMIT", 20),
            cleanup_interval_sec: parse_env_with_default("CLEANUP_INTERVAL_SEC", 3600),
            cleanup_staleness_hours: parse_env_with_default("CLEANUP_STALENESS_HOURS", 72),
            cleanup_stale_score_cutoff: parse_env_with_default("CLEANUP_STALE_SCORE_CUTOFF", 0.25),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env_with_default("PORT", 8014),
            internal_service_token: std::env::var("INTERNAL_SERVICE_TOKEN").ok(),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: parse_env_with_default("DB_MAX_CONNECTIONS", 20),
            min_connections: parse_env_with_default("DB_MIN_CONNECTIONS", 5),
            acquire_timeout_sec: parse_env_with_default("DB_ACQUIRE_TIMEOUT_SEC", 5),
        };

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?,
            display_key_prefix: std::env::var("REDIS_DISPLAY_KEY_PREFIX")
                .unwrap_or_else(|_| "nova:suggested:display".to_string()),
            display_ttl_sec: parse_env_with_default("REDIS_DISPLAY_TTL_SEC", 300),
        };

        let config = Config {
            app,
            database,
            redis,
            engine: EngineConfig::default(),
            jobs: JobsConfig::default(),
        };
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.top_k == 0 {
            return Err("ENGINE_TOP_K must be greater than 0".to_string());
        }

        if self.engine.display_count == 0 || self.engine.display_count > self.engine.top_k {
            return Err("ENGINE_DISPLAY_COUNT must be in 1..=ENGINE_TOP_K".to_string());
        }

        if self.engine.scoring.min_score > self.engine.scoring.max_score {
            return Err("SCORING_MIN must not exceed SCORING_MAX".to_string());
        }

        if self.engine.scoring.normalizer <= 0.0 {
            return Err("SCORING_NORMALIZER must be greater than 0".to_string());
        }

        if self.jobs.worker_count == 0 {
            return Err("JOB_WORKER_COUNT must be greater than 0".to_string());
        }

        if self.jobs.queue_capacity == 0 {
            return Err("JOB_QUEUE_CAPACITY must be greater than 0".to_string());
        }

        if self.jobs.max_attempts == 0 {
            return Err("JOB_MAX_ATTEMPTS must be greater than 0".to_string());
        }

        if self.jobs.periodic_interval_sec == 0 {
            return Err("JOB_PERIODIC_INTERVAL_SEC must be greater than 0".to_string());
        }

        if self.jobs.cleanup_interval_sec == 0 {
            return Err("CLEANUP_INTERVAL_SEC must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("REDIS_URL", "redis://localhost");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.app.http_port, 8014);
        assert_eq!(config.engine.top_k, 30);
        assert_eq!(config.engine.display_count, 4);
        assert_eq!(config.jobs.worker_count, 4);
        assert_eq!(config.jobs.fanout_limit, 20);
        assert_eq!(config.redis.display_ttl_sec, 300);
    }

    #[test]
    fn test_scoring_defaults() {
        let scoring = ScoringParams::default();
        assert_eq!(scoring.base, 0.5);
        assert_eq!(scoring.normalizer, 3.0);
        assert_eq!(scoring.min_score, 0.2);
        assert_eq!(scoring.max_score, 0.9);
        assert_eq!(scoring.new_account_age_days, 30);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("REDIS_URL", "redis://localhost");

        let mut config = Config::from_env().unwrap();
        assert!(config.validate().is_ok());

        config.jobs.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_display_above_top_k() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("REDIS_URL", "redis://localhost");

        let mut config = Config::from_env().unwrap();
        config.engine.display_count = config.engine.top_k + 1;
        assert!(config.validate().is_err());
    }
}
