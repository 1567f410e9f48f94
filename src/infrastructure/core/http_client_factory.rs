//! Retry-middleware HTTP client factory (spec §4.A: exponential backoff,
//! base 200ms, factor 2, max 5 tries). Near-verbatim from the teacher's
//! `infrastructure/core/http_client_factory.rs`, retuned to the spec's
//! backoff parameters.

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// base=200ms, factor=2, max 5 tries (spec §4.A).
    pub fn create_client(request_timeout: Duration) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(10))
            .build_with_max_retries(5);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}
