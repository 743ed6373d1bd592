use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::constants::USER_AGENT;
use crate::upload::Policy;
use crate::{Error, Result};

/// The endpoint pings are submitted to unless configured otherwise.
pub const DEFAULT_SERVER_ENDPOINT: &str = "https://incoming.telemetry.invalid";

/// Configuration settings for a [`Beacon`](crate::Beacon) context.
///
/// The configuration is consumed when the context is created and is never
/// persisted.
///
/// # Examples
///
/// ```
/// let config = beacon_core::Configuration::configure(|c| {
///     c.set_application_id("org-example-app")
///         .set_data_path("/tmp/beacon-doc")
///         .set_max_events(100)
/// });
/// assert_eq!(config.max_events, 100);
/// ```
#[derive(Clone, Debug)]
pub struct Configuration {
    /// The directory holding the database.
    pub data_path: PathBuf,
    /// The application id, used in submission paths.
    pub application_id: String,
    /// Whether uploading (and thus recording) is enabled at start.
    pub upload_enabled: bool,
    /// The collector endpoint.
    pub server_endpoint: Url,
    /// The number of events after which the events ping is submitted.
    pub max_events: usize,
    /// How often the `metrics` ping is scheduled.
    pub metrics_ping_interval: Duration,
    /// A tag sent as `X-Debug-ID` to route pings to a debug view.
    pub debug_view_tag: Option<String>,
    /// Logs assembled ping bodies at info level.
    pub log_pings: bool,
    /// The release channel reported in `client_info`.
    pub app_channel: Option<String>,
    /// The agent reported in the `X-Telemetry-Agent` header.
    pub user_agent: Cow<'static, str>,
    /// How long dropping the guard waits for the upload queue to drain.
    pub shutdown_timeout: Duration,
    /// Queue bounds, retry and rate limiting.
    pub upload_policy: Policy,
}

impl Configuration {
    /// Creates a configuration for the given data directory and application.
    pub fn new<P, A>(data_path: P, application_id: A) -> Self
    where
        P: Into<PathBuf>,
        A: Into<String>,
    {
        Configuration {
            data_path: data_path.into(),
            application_id: application_id.into(),
            ..Default::default()
        }
    }

    /// Creates a default configuration and immediately configures it.
    pub fn configure<F>(f: F) -> Self
    where
        F: FnOnce(&mut Configuration) -> &mut Configuration,
    {
        let mut config = Self::default();
        f(&mut config);
        config
    }

    /// Set the directory holding the database.
    pub fn set_data_path<P: Into<PathBuf>>(&mut self, data_path: P) -> &mut Self {
        self.data_path = data_path.into();
        self
    }

    /// Set the application id.
    pub fn set_application_id<A: Into<String>>(&mut self, application_id: A) -> &mut Self {
        self.application_id = application_id.into();
        self
    }

    /// Enables/disables upload at start.
    pub fn set_upload_enabled(&mut self, upload_enabled: bool) -> &mut Self {
        self.upload_enabled = upload_enabled;
        self
    }

    /// Set the collector endpoint.
    pub fn set_server_endpoint(&mut self, server_endpoint: Url) -> &mut Self {
        self.server_endpoint = server_endpoint;
        self
    }

    /// Set the number of events that triggers an events ping. (defaults to 500)
    pub fn set_max_events(&mut self, max_events: usize) -> &mut Self {
        self.max_events = max_events;
        self
    }

    /// Set the schedule of the `metrics` ping. (defaults to 24 hours)
    pub fn set_metrics_ping_interval(&mut self, interval: Duration) -> &mut Self {
        self.metrics_ping_interval = interval;
        self
    }

    /// Tag outgoing pings for a debug view.
    pub fn set_debug_view_tag(&mut self, tag: Option<String>) -> &mut Self {
        self.debug_view_tag = tag;
        self
    }

    /// Log assembled ping bodies.
    pub fn set_log_pings(&mut self, log_pings: bool) -> &mut Self {
        self.log_pings = log_pings;
        self
    }

    /// Set the release channel.
    pub fn set_app_channel(&mut self, channel: Option<String>) -> &mut Self {
        self.app_channel = channel;
        self
    }

    /// Set the timeout for draining the queue when the guard is dropped.
    pub fn set_shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the upload policy.
    pub fn set_upload_policy(&mut self, policy: Policy) -> &mut Self {
        self.upload_policy = policy;
        self
    }

    /// Rejects configurations the context cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "application_id must not be empty".into(),
            ));
        }
        if self.upload_policy.max_pending_pings_count == 0 {
            return Err(Error::InvalidConfiguration(
                "max_pending_pings_count must be at least 1".into(),
            ));
        }
        if self.max_events == 0 {
            return Err(Error::InvalidConfiguration(
                "max_events must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            data_path: PathBuf::from("beacon_data"),
            application_id: String::new(),
            upload_enabled: true,
            server_endpoint: Url::parse(DEFAULT_SERVER_ENDPOINT)
                .expect("invalid default server endpoint"),
            max_events: 500,
            metrics_ping_interval: Duration::from_secs(24 * 60 * 60),
            debug_view_tag: None,
            log_pings: false,
            app_channel: None,
            user_agent: Cow::Borrowed(&USER_AGENT),
            shutdown_timeout: Duration::from_secs(2),
            upload_policy: Policy::default(),
        }
    }
}
