//! Response shapes for the fixed GraphQL queries.
//!
//! Numeric fields the API has historically returned as either numbers or
//! strings (`length`, `createdAt`, `viewCount`) are kept as raw JSON values
//! and normalized by the client.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastBroadcastData {
    pub past_broadcast: Option<PastBroadcast>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastBroadcast {
    pub id: Option<String>,
    pub title: Option<String>,
    pub length: Option<serde_json::Value>,
    pub playback_url: Option<String>,
    pub created_at: Option<serde_json::Value>,
    pub thumbnail_url: Option<String>,
    pub view_count: Option<serde_json::Value>,
    pub creator: Option<Creator>,
}

#[derive(Debug, Deserialize)]
pub struct Creator {
    pub displayname: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBroadcastsData {
    pub user_by_display_name: Option<UserByDisplayName>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserByDisplayName {
    pub displayname: Option<String>,
    pub username: Option<String>,
    pub past_broadcasts_v2: Option<PastBroadcastsV2>,
}

#[derive(Debug, Deserialize)]
pub struct PastBroadcastsV2 {
    pub list: Option<Vec<RecentBroadcastItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBroadcastItem {
    pub id: Option<String>,
    pub permlink: Option<String>,
    pub title: Option<String>,
    pub length: Option<serde_json::Value>,
    pub created_at: Option<serde_json::Value>,
    pub playback_url: Option<String>,
    pub view_count: Option<serde_json::Value>,
}
