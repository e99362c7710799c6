use std::time::Duration;

use async_trait::async_trait;
use http_retry::{AttemptOutcome, RetryPolicy, run};
use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::broadcast::{BroadcastMetadata, BroadcastRef, RecentBroadcast};
use crate::error::ApiError;
use crate::models::{
    GraphQlResponse, PastBroadcastData, RecentBroadcastsData,
};

pub const GRAPHQL_ENDPOINT: &str = "https://graphigo.prd.dlive.tv/";

const PAST_BROADCAST_QUERY: &str = "query PastBroadcastPage($permlink: String!) { \
     pastBroadcast(permlink: $permlink) { \
     id title length playbackUrl createdAt thumbnailUrl viewCount \
     creator { displayname username } } }";

const RECENT_BROADCASTS_QUERY: &str = "query PastBroadcastList($displayname: String!, $first: Int!) { \
     userByDisplayName(displayname: $displayname) { \
     displayname username \
     pastBroadcastsV2(first: $first) { \
     list { id permlink title length createdAt playbackUrl viewCount } } } }";

// Kept short so error messages stay readable in logs and the UI.
const ERROR_BODY_LIMIT: usize = 200;

/// Seam between the orchestrator and the platform API, so tests can inject
/// canned metadata without a network.
#[async_trait]
pub trait BroadcastResolver: Send + Sync {
    async fn resolve(&self, broadcast: &BroadcastRef) -> Result<BroadcastMetadata, ApiError>;
}

pub struct MetadataClient {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl MetadataClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: GRAPHQL_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lists a channel's recent past broadcasts, newest first as the API
    /// returns them.
    pub async fn list_recent_broadcasts(
        &self,
        displayname: &str,
        first: u32,
    ) -> Result<Vec<RecentBroadcast>, ApiError> {
        let body = serde_json::json!({
            "operationName": "PastBroadcastList",
            "variables": { "displayname": displayname, "first": first },
            "query": RECENT_BROADCASTS_QUERY,
        });
        let payload: GraphQlResponse<RecentBroadcastsData> =
            self.post_gql(&body, "recent broadcasts").await?;
        recents_from_payload(displayname, payload)
    }

    async fn post_gql<T: DeserializeOwned>(
        &self,
        body: &serde_json::Value,
        what: &str,
    ) -> Result<GraphQlResponse<T>, ApiError> {
        run(&self.retry, what, |attempt| async move {
            debug!(what, attempt, "sending GraphQL request");
            let response = match self
                .client
                .post(&self.endpoint)
                .json(body)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    return AttemptOutcome::Retry {
                        error: ApiError::from(e),
                        after: None,
                    };
                }
                Err(e) => return AttemptOutcome::Abort(ApiError::from(e)),
            };

            let status = response.status();
            if status.is_success() {
                match response.json::<GraphQlResponse<T>>().await {
                    Ok(payload) => AttemptOutcome::Success(payload),
                    Err(e) => AttemptOutcome::Abort(ApiError::Upstream {
                        status: status.as_u16(),
                        body: format!("undecodable GraphQL response: {e}"),
                    }),
                }
            } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let after = retry_after(response.headers());
                AttemptOutcome::Retry {
                    error: upstream_error(status, response).await,
                    after,
                }
            } else {
                AttemptOutcome::Abort(upstream_error(status, response).await)
            }
        })
        .await
    }
}

#[async_trait]
impl BroadcastResolver for MetadataClient {
    async fn resolve(&self, broadcast: &BroadcastRef) -> Result<BroadcastMetadata, ApiError> {
        let permlink = broadcast.permlink();
        let body = serde_json::json!({
            "operationName": "PastBroadcastPage",
            "variables": { "permlink": permlink },
            "query": PAST_BROADCAST_QUERY,
        });
        let payload: GraphQlResponse<PastBroadcastData> =
            self.post_gql(&body, "broadcast metadata").await?;
        metadata_from_payload(&permlink, payload)
    }
}

async fn upstream_error(status: StatusCode, response: reqwest::Response) -> ApiError {
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(ERROR_BODY_LIMIT);
    ApiError::Upstream {
        status: status.as_u16(),
        body,
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    // Only the delta-seconds form; an HTTP-date falls back to backoff.
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn metadata_from_payload(
    permlink: &str,
    payload: GraphQlResponse<PastBroadcastData>,
) -> Result<BroadcastMetadata, ApiError> {
    fail_on_graphql_errors(&payload)?;
    let broadcast = payload
        .data
        .and_then(|data| data.past_broadcast)
        .ok_or_else(|| ApiError::NotFound(permlink.to_string()))?;

    let master_playlist_url = broadcast
        .playback_url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::Upstream {
            status: 200,
            body: "broadcast is missing a playback URL".to_string(),
        })?;

    let owner_display_name = broadcast
        .creator
        .and_then(|creator| creator.displayname.or(creator.username))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(BroadcastMetadata {
        title: broadcast
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| permlink.to_string()),
        owner_display_name,
        duration_seconds: integer_value(broadcast.length.as_ref()).unwrap_or(0),
        master_playlist_url,
    })
}

fn recents_from_payload(
    displayname: &str,
    payload: GraphQlResponse<RecentBroadcastsData>,
) -> Result<Vec<RecentBroadcast>, ApiError> {
    fail_on_graphql_errors(&payload)?;
    let user = payload
        .data
        .and_then(|data| data.user_by_display_name)
        .ok_or_else(|| ApiError::NotFound(displayname.to_string()))?;

    let items = user
        .past_broadcasts_v2
        .and_then(|broadcasts| broadcasts.list)
        .unwrap_or_default();

    let results: Vec<RecentBroadcast> = items
        .into_iter()
        .filter_map(|item| {
            // Entries without a permlink or playback URL cannot be acted on.
            let permlink = item.permlink.filter(|p| !p.is_empty())?;
            let playback_url = item.playback_url.filter(|u| !u.is_empty())?;
            Some(RecentBroadcast {
                title: item.title.filter(|t| !t.is_empty()).unwrap_or_else(|| permlink.clone()),
                duration_seconds: integer_value(item.length.as_ref()),
                created_at_ms: integer_value(item.created_at.as_ref()).map(|ms| ms as i64),
                permlink,
                playback_url,
            })
        })
        .collect();

    if results.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no past broadcasts for {displayname}"
        )));
    }
    Ok(results)
}

fn fail_on_graphql_errors<T>(payload: &GraphQlResponse<T>) -> Result<(), ApiError> {
    if payload.errors.is_empty() {
        return Ok(());
    }
    let message = payload
        .errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Err(ApiError::Upstream {
        status: 200,
        body: message,
    })
}

// The API has returned these counters as numbers and as strings over time.
fn integer_value(value: Option<&serde_json::Value>) -> Option<u64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f as u64),
        serde_json::Value::String(s) => s.parse::<f64>().ok().map(|f| f as u64),
        _ => None,
    }
}
