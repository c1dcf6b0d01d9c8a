//! Tunables shared by the gateways, the resolver, and the runner.

use std::time::Duration;

use ureq::Agent;

use crate::resolve::RetryPolicy;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHECK_COOLDOWN: Duration = Duration::from_secs(5);

/// Everything a batch run can be tuned with.
///
/// `Default` mirrors the pacing Fragment tolerates without throttling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Upper bound for every single HTTP call.
    pub request_timeout: Duration,
    /// How the auction query is retried.
    pub retry: RetryPolicy,
    /// Wait after each check that reached the network.
    pub check_cooldown: Duration,
    /// Probe `t.me` when Fragment's signals are ambiguous.
    pub web_fallback: bool,
    /// Number of workers; each owns its own HTTP session.
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            check_cooldown: CHECK_COOLDOWN,
            web_fallback: true,
            concurrency: default_concurrency(),
        }
    }
}

impl Settings {
    /// A fresh HTTP session: its own connection pool and cookie jar.
    ///
    /// Fragment binds the discovered API URL to the session cookie, so a
    /// worker must keep using the agent it discovered the endpoint with.
    #[must_use]
    pub fn agent(&self) -> Agent {
        let config = Agent::config_builder()
            .timeout_global(Some(self.request_timeout))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION"),
                " (",
                env!("CARGO_PKG_REPOSITORY"),
                ")"
            ))
            .build();
        Agent::new_with_config(config)
    }
}

/// The host's available parallelism, or 1 if it cannot be determined.
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}
