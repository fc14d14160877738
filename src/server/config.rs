//! Relay configuration

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Default per-viewer buffer, in chunks
pub const DEFAULT_VIEWER_BUFFER: usize = 64;

/// Default capacity of the lifecycle event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Upstream source: URL and optional Digest credentials
#[derive(Clone)]
pub struct SourceConfig {
    /// MJPEG source URL
    pub url: String,

    /// Username for Digest authentication
    pub username: Option<String>,

    /// Password for Digest authentication
    pub password: Option<String>,
}

impl SourceConfig {
    /// Create a source without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Set Digest credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Check whether credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Relay session configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream source
    pub source: SourceConfig,

    /// Deadline for the connect handshake, including a Digest retry
    pub connect_timeout: Duration,

    /// Give up on upstream when no chunk arrives for this long (None = wait forever)
    pub idle_timeout: Option<Duration>,

    /// Chunks buffered per viewer before it is dropped as too slow
    pub viewer_buffer: usize,

    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,

    /// Close attached viewers when upstream fails
    ///
    /// When disabled, viewers stay attached across an upstream failure and
    /// resume (re-aligned on the next delimiter) once a later join reconnects.
    pub close_viewers_on_error: bool,

    /// User-Agent sent upstream
    pub user_agent: String,
}

impl RelayConfig {
    /// Create a config for the given source with default options
    pub fn new(source: SourceConfig) -> Self {
        Self {
            source,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(60)),
            viewer_buffer: DEFAULT_VIEWER_BUFFER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            close_viewers_on_error: true,
            user_agent: concat!("mjpeg-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Wait for upstream chunks indefinitely
    pub fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Set per-viewer buffer size in chunks
    pub fn viewer_buffer(mut self, chunks: usize) -> Self {
        self.viewer_buffer = chunks;
        self
    }

    /// Set lifecycle event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Keep viewers attached when upstream fails
    pub fn keep_viewers_on_error(mut self) -> Self {
        self.close_viewers_on_error = false;
        self
    }

    /// Set the upstream User-Agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Check the source URL and buffer sizes
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.source.url)
            .map_err(|_| ConfigError::InvalidUrl(self.source.url.clone()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }

        if self.viewer_buffer == 0 {
            return Err(ConfigError::ZeroViewerBuffer);
        }

        Ok(url)
    }
}
