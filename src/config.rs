use std::time::Duration;

use crate::constants::filters::OPTION_CACHE_TTL_SECS;
use crate::constants::submissions::{MAX_PER_WINDOW, WINDOW_SECS};
use crate::constants::transport::{BASE_BACKOFF_MS, MAX_RETRIES, REQUEST_TIMEOUT_SECS};
use crate::constants::upstream::{
    ENV_ANON_KEY, ENV_CACHE_TTL_SECS, ENV_PAGE_SIZE, ENV_URL, FLOODS_TABLE, MAX_PAGE_SIZE,
    PLACEHOLDER_MARKERS, SUBMISSIONS_TABLE,
};
use crate::errors::FloodError;
use crate::types::TableName;

/// Bounded retry with exponential backoff for transient upstream failures.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

/// Per-contributor submission allowance over a rolling window.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitPolicy {
    /// Maximum submissions inside one window.
    pub max_submissions: usize,
    /// Window length.
    pub window: chrono::Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_submissions: MAX_PER_WINDOW,
            window: chrono::Duration::seconds(WINDOW_SECS),
        }
    }
}

/// Connection and behavior settings for the flood client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Project base URL, e.g. `https://abcd.supabase.co`.
    pub base_url: String,
    /// Anonymous API key sent with every request.
    pub anon_key: String,
    /// Table holding flood events.
    pub floods_table: TableName,
    /// Table receiving community submissions.
    pub submissions_table: TableName,
    /// Rows requested per page; must not exceed the upstream ceiling.
    pub page_size: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry behavior for transient failures.
    pub retry: RetryPolicy,
    /// Lifetime of the cached unfiltered option set.
    pub option_cache_ttl: chrono::Duration,
    /// Advisory client-side submission limit.
    pub rate_limit: RateLimitPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            anon_key: String::new(),
            floods_table: FLOODS_TABLE.to_string(),
            submissions_table: SUBMISSIONS_TABLE.to_string(),
            page_size: MAX_PAGE_SIZE,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            option_cache_ttl: chrono::Duration::seconds(OPTION_CACHE_TTL_SECS),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given project URL and key with default settings.
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            ..Self::default()
        }
    }

    /// Build a validated config from process environment variables.
    pub fn from_env() -> Result<Self, FloodError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a validated config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FloodError> {
        let mut config = Self::new(
            lookup(ENV_URL).unwrap_or_default().trim(),
            lookup(ENV_ANON_KEY).unwrap_or_default().trim(),
        );
        if let Some(raw) = lookup(ENV_PAGE_SIZE)
            && !raw.trim().is_empty()
        {
            config.page_size = raw.trim().parse().map_err(|_| {
                FloodError::Configuration(format!("{ENV_PAGE_SIZE} must be a positive integer"))
            })?;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL_SECS)
            && !raw.trim().is_empty()
        {
            let secs: i64 = raw.trim().parse().map_err(|_| {
                FloodError::Configuration(format!("{ENV_CACHE_TTL_SECS} must be an integer"))
            })?;
            config.option_cache_ttl = chrono::Duration::seconds(secs.max(0));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject missing or placeholder connection parameters and invalid limits.
    pub fn validate(&self) -> Result<(), FloodError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(FloodError::Configuration(format!("{ENV_URL} is not set")));
        }
        if is_placeholder(url) {
            return Err(FloodError::Configuration(format!(
                "{ENV_URL} still holds a placeholder value"
            )));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(FloodError::Configuration(format!(
                "{ENV_URL} must be an http(s) URL, got '{url}'"
            )));
        }
        let key = self.anon_key.trim();
        if key.is_empty() {
            return Err(FloodError::Configuration(format!("{ENV_ANON_KEY} is not set")));
        }
        if is_placeholder(key) {
            return Err(FloodError::Configuration(format!(
                "{ENV_ANON_KEY} still holds a placeholder value"
            )));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(FloodError::Configuration(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.floods_table.trim().is_empty() || self.submissions_table.trim().is_empty() {
            return Err(FloodError::Configuration("table names must not be empty".into()));
        }
        Ok(())
    }
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_MARKERS
        .iter()
        .any(|marker| value.contains(marker))
}
