//! Configuration for Profile Sync
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! can also be set through the environment (or a `.env` file).

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cache::CacheConfig;
use crate::network::{CatalystConfig, RetryPolicy};
use crate::services::{OwnershipConfig, SanitizerConfig, SynchronizerConfig};
use crate::worker::WriteQueueConfig;

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Profile Sync - avatar profile replica for the content network
#[derive(Parser, Debug, Clone)]
#[command(name = "profile-sync")]
#[command(about = "Keeps a local replica of avatar profiles in sync with the content network")]
pub struct Args {
    /// Comma-separated content server URLs, tried in order
    #[arg(
        long,
        env = "CONTENT_SERVERS",
        default_value = "https://peer.decentraland.org/content"
    )]
    pub content_servers: String,

    /// Base URL for canonical profile lookups
    #[arg(long, env = "LAMBDAS_URL", default_value = "https://peer.decentraland.org/lambdas")]
    pub lambdas_url: String,

    /// Base URL for avatar snapshot images
    #[arg(
        long,
        env = "PROFILE_IMAGES_URL",
        default_value = "https://profile-images.decentraland.org"
    )]
    pub profile_images_url: String,

    /// SQLite database file (profiles, failed fetches, sync state)
    #[arg(long, env = "DATABASE_PATH", default_value = "profile-sync.db")]
    pub database_path: String,

    /// NATS server URL; when unset L2 is kept in process
    #[arg(long, env = "NATS_URL")]
    pub nats_url: Option<String>,

    /// JetStream key-value bucket holding L2 profiles
    #[arg(long, env = "NATS_KV_BUCKET", default_value = "profiles")]
    pub nats_kv_bucket: String,

    /// L2 entry time-to-live in seconds
    #[arg(long, env = "L2_TTL_SECS", default_value = "3600")]
    pub l2_ttl_secs: u64,

    /// Maximum number of profiles held in L1
    #[arg(long, env = "HOT_CACHE_MAX_ENTRIES", default_value = "50000")]
    pub hot_cache_max_entries: usize,

    /// Cursor age (days) beyond which bootstrap reads snapshots first
    #[arg(long, env = "BOOTSTRAP_THRESHOLD_DAYS", default_value = "7")]
    pub bootstrap_threshold_days: i64,

    /// Steady-state pointer-changes poll interval (seconds)
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "5")]
    pub poll_interval_secs: u64,

    /// Failed-fetch retry interval (seconds)
    #[arg(long, env = "FAILED_FETCH_RETRY_INTERVAL_SECS", default_value = "60")]
    pub failed_fetch_retry_interval_secs: u64,

    /// Retries after which a failed fetch is left for inspection
    #[arg(long, env = "MAX_FAILED_FETCH_RETRIES", default_value = "5")]
    pub max_failed_fetch_retries: u32,

    /// Concurrent durable writes while draining the queue
    #[arg(long, env = "DB_WRITE_CONCURRENCY", default_value = "30")]
    pub db_write_concurrency: usize,

    /// Ownership validation interval (seconds)
    #[arg(long, env = "OWNERSHIP_INTERVAL_SECS", default_value = "300")]
    pub ownership_interval_secs: u64,

    /// Delay before the first ownership validation (seconds)
    #[arg(long, env = "OWNERSHIP_INITIAL_DELAY_SECS", default_value = "60")]
    pub ownership_initial_delay_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Content server URLs, trimmed, without empties
    pub fn content_server_list(&self) -> Vec<String> {
        self.content_servers
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.content_server_list().is_empty() {
            return Err("CONTENT_SERVERS must name at least one server".to_string());
        }
        if self.db_write_concurrency == 0 {
            return Err("DB_WRITE_CONCURRENCY must be greater than zero".to_string());
        }
        if self.hot_cache_max_entries == 0 {
            return Err("HOT_CACHE_MAX_ENTRIES must be greater than zero".to_string());
        }
        for (name, value) in [
            ("POLL_INTERVAL_SECS", self.poll_interval_secs),
            ("FAILED_FETCH_RETRY_INTERVAL_SECS", self.failed_fetch_retry_interval_secs),
            ("OWNERSHIP_INTERVAL_SECS", self.ownership_interval_secs),
            ("L2_TTL_SECS", self.l2_ttl_secs),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        if self.bootstrap_threshold_days < 0 {
            return Err("BOOTSTRAP_THRESHOLD_DAYS must not be negative".to_string());
        }
        Ok(())
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    pub fn catalyst_config(&self) -> CatalystConfig {
        CatalystConfig {
            content_servers: self.content_server_list(),
            lambdas_url: self.lambdas_url.trim_end_matches('/').to_string(),
            ..CatalystConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.hot_cache_max_entries,
            ..CacheConfig::default()
        }
    }

    pub fn sanitizer_config(&self) -> SanitizerConfig {
        SanitizerConfig {
            retry: RetryPolicy::default(),
            profile_images_url: self.profile_images_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn write_queue_config(&self) -> WriteQueueConfig {
        WriteQueueConfig {
            concurrency: self.db_write_concurrency,
            ..WriteQueueConfig::default()
        }
    }

    pub fn synchronizer_config(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            bootstrap_threshold_days: self.bootstrap_threshold_days,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            failed_fetch_retry_interval: Duration::from_secs(self.failed_fetch_retry_interval_secs),
            max_failed_fetch_retries: self.max_failed_fetch_retries,
            ..SynchronizerConfig::default()
        }
    }

    pub fn ownership_config(&self) -> OwnershipConfig {
        OwnershipConfig {
            initial_delay: Duration::from_secs(self.ownership_initial_delay_secs),
            interval: Duration::from_secs(self.ownership_interval_secs),
            ..OwnershipConfig::default()
        }
    }
}
