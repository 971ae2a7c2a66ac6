//! Orchestrator configuration.

use crate::session::DispatchMode;
use std::time::Duration;
use tokensim_env::Credential;

/// Default base URL of the simulation API.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Default streaming endpoint.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

/// Reconnection backoff of the shared channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Configuration for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base URL for `/simulate/scenario` and `/simulate/compare`
    pub api_url: String,

    /// Streaming channel endpoint
    pub ws_url: String,

    pub reconnect: ReconnectPolicy,

    /// Mode used by [`Orchestrator::run_scenario`](crate::Orchestrator::run_scenario)
    pub default_mode: DispatchMode,

    /// Timeout of one direct provider call
    pub request_timeout: Duration,

    /// Connect the channel in `start()`
    pub auto_connect: bool,

    /// Upper bound for remote comparisons
    pub max_remote_scenarios: usize,

    /// Attached to the channel at connect time
    pub credential: Option<Credential>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            default_mode: DispatchMode::Direct,
            request_timeout: Duration::from_secs(30),
            auto_connect: false,
            max_remote_scenarios: 5,
            credential: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `TOKENSIM_API_URL`, `TOKENSIM_WS_URL` and
    /// `TOKENSIM_TOKEN` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("TOKENSIM_API_URL").filter(|v| !v.is_empty()) {
            config.api_url = url;
        }
        if let Some(url) = lookup("TOKENSIM_WS_URL").filter(|v| !v.is_empty()) {
            config.ws_url = url;
        }
        if let Some(token) = lookup("TOKENSIM_TOKEN").filter(|v| !v.is_empty()) {
            config.credential = Some(Credential::new(token));
        }
        config
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_default_mode(mut self, mode: DispatchMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn with_max_remote_scenarios(mut self, max: usize) -> Self {
        self.max_remote_scenarios = max;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}
