//! Runtime tuning.
//!
//! Every threshold and interval is a configuration input; the defaults are
//! the values the persona was originally tuned with.

use crate::rate_limit::RateLimits;
use crate::style::StylePolicy;
use herald_types::RuntimeSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration shared by all workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Settings used when no database row overrides them
    #[serde(default)]
    pub settings: RuntimeSettings,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub self_style: SelfStyleConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Caps on the "post" action class
    #[serde(default)]
    pub rate_limits: RateLimits,

    #[serde(default)]
    pub style_policy: StylePolicy,

    /// Replies per conversation before the thread is stopped
    #[serde(default = "default_max_replies_per_thread")]
    pub max_replies_per_thread: u32,

    /// Upper bound on any single collaborator call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Provide a leader lock to the self-style worker
    #[serde(default = "default_true")]
    pub leader_lock_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            settings: RuntimeSettings::default(),
            ingestion: IngestionConfig::default(),
            timeline: TimelineConfig::default(),
            learning: LearningConfig::default(),
            self_style: SelfStyleConfig::default(),
            publisher: PublisherConfig::default(),
            rate_limits: RateLimits::default(),
            style_policy: StylePolicy::default(),
            max_replies_per_thread: default_max_replies_per_thread(),
            call_timeout_secs: default_call_timeout(),
            leader_lock_enabled: true,
        }
    }
}

impl RuntimeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Source label stored with every inbox row
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_ingestion_interval")]
    pub interval_secs: u64,

    /// Items scoring below this are discarded
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Stored items without a drafted reply retried per poll
    #[serde(default = "default_resume_batch")]
    pub resume_batch_size: usize,

    /// Retries after which a stored item is closed without a reply
    #[serde(default = "default_item_attempts")]
    pub max_item_attempts: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            interval_secs: default_ingestion_interval(),
            score_threshold: default_score_threshold(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            resume_batch_size: default_resume_batch(),
            max_item_attempts: default_item_attempts(),
        }
    }
}

/// Timeline poster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_timeline_interval")]
    pub interval_secs: u64,

    /// Maximum random offset applied to each interval, either direction
    #[serde(default = "default_timeline_jitter")]
    pub jitter_secs: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_timeline_interval(),
            jitter_secs: default_timeline_jitter(),
        }
    }
}

/// Learning worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_learning_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_learning_batch")]
    pub batch_size: usize,

    /// A failing row waits this long before its second attempt; the wait
    /// doubles with every further failure
    #[serde(default = "default_learning_interval")]
    pub retry_base_secs: u64,

    /// Failed attempts after which a row is marked learned without memories
    #[serde(default = "default_learning_attempts")]
    pub max_attempts: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_learning_interval(),
            batch_size: default_learning_batch(),
            retry_base_secs: default_learning_interval(),
            max_attempts: default_learning_attempts(),
        }
    }
}

/// Self-style worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfStyleConfig {
    #[serde(default = "default_self_style_interval")]
    pub interval_secs: u64,

    /// Minimum posted items required before a proposal is generated
    #[serde(default = "default_min_posts")]
    pub min_posts: usize,

    /// Most recent posted items handed to the analyzer
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    #[serde(default = "default_lock_key")]
    pub lock_key: String,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for SelfStyleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_self_style_interval(),
            min_posts: default_min_posts(),
            sample_size: default_sample_size(),
            lock_key: default_lock_key(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

impl SelfStyleConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Publisher sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_publisher_interval")]
    pub interval_secs: u64,

    /// Drafts attempted per sweep
    #[serde(default = "default_publisher_batch")]
    pub batch_size: usize,

    /// First wait after a transient publish failure; doubles per failure
    #[serde(default = "default_publisher_interval")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_publisher_interval(),
            batch_size: default_publisher_batch(),
            backoff_base_secs: default_publisher_interval(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_source() -> String {
    "x".to_string()
}

fn default_ingestion_interval() -> u64 {
    45
}

fn default_score_threshold() -> f64 {
    0.3
}

fn default_resume_batch() -> usize {
    20
}

fn default_item_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    15 * 60
}

fn default_timeline_interval() -> u64 {
    3 * 60 * 60
}

fn default_timeline_jitter() -> u64 {
    15 * 60
}

fn default_learning_interval() -> u64 {
    60
}

fn default_learning_batch() -> usize {
    50
}

fn default_learning_attempts() -> u32 {
    5
}

fn default_self_style_interval() -> u64 {
    24 * 60 * 60
}

fn default_min_posts() -> usize {
    25
}

fn default_sample_size() -> usize {
    200
}

fn default_lock_key() -> String {
    "self_style".to_string()
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_publisher_interval() -> u64 {
    30
}

fn default_publisher_batch() -> usize {
    10
}

fn default_max_replies_per_thread() -> u32 {
    5
}

fn default_call_timeout() -> u64 {
    30
}
