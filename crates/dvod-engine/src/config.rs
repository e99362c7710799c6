use std::sync::Arc;
use std::time::Duration;

use http_retry::RetryPolicy;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use rustls::ClientConfig;
use rustls_platform_verifier::BuilderVerifierExt;

use crate::error::DownloadError;

const DEFAULT_USER_AGENT: &str = concat!("dvod/", env!("CARGO_PKG_VERSION"));

/// All pipeline knobs, passed explicitly at construction so tests can inject
/// deterministic components instead of relying on ambient state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agent: String,
    /// Time to establish the initial connection.
    pub connect_timeout: Duration,
    /// Cap on each metadata/playlist HTTP operation.
    pub playlist_fetch_timeout: Duration,
    /// Cap on each segment HTTP operation, body included.
    pub segment_fetch_timeout: Duration,
    /// Segments fetched ahead of the write cursor. 1 disables prefetching.
    pub prefetch_concurrency: usize,
    /// Retry budget for the GraphQL metadata queries.
    pub metadata_retry: RetryPolicy,
    /// Retry budget for individual segment fetches.
    pub segment_retry: RetryPolicy,
    /// Capacity of the progress event channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(10),
            playlist_fetch_timeout: Duration::from_secs(20),
            segment_fetch_timeout: Duration::from_secs(30),
            prefetch_concurrency: 3,
            metadata_retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            segment_retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            event_channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub(crate) fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers
    }
}

/// Builds the shared HTTP client used by every pipeline component.
pub fn create_client(config: &EngineConfig) -> Result<Client, DownloadError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("failed to configure default TLS protocol versions")
        .with_platform_verifier()
        .expect("failed to initialize platform certificate verifier")
        .with_no_client_auth();

    Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(EngineConfig::default_headers())
        .use_preconfigured_tls(tls_config)
        .connect_timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(DownloadError::from)
}
