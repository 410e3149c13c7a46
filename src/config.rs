//! Client configuration, resolved once at process start.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://localhost:8443";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// When the controller stops polling on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PollPolicy {
    /// Stop once the scan status is COMPLETED or FAILED.
    #[default]
    UntilTerminal,
    /// Keep polling until reset or teardown.
    Indefinite,
}

/// Ordering of heatmap cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HeatmapOrder {
    /// Order of first appearance in the server's severity totals.
    #[default]
    Server,
    /// CRITICAL, HIGH, MEDIUM, LOW.
    SeverityRank,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_policy: PollPolicy,
    pub heatmap_order: HeatmapOrder,
}

impl ClientConfig {
    /// Parse and validate a base URL. A missing trailing slash is added so
    /// relative endpoint paths join under any path prefix.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_policy: PollPolicy::default(),
            heatmap_order: HeatmapOrder::default(),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }
        self.poll_interval = interval;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn with_heatmap_order(mut self, order: HeatmapOrder) -> Self {
        self.heatmap_order = order;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_policy: PollPolicy::default(),
            heatmap_order: HeatmapOrder::default(),
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|source| ConfigError::BaseUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Scheme(other.to_string())),
    }
}
