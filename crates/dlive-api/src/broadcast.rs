use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ApiError;

// https://dlive.tv/p/<owner>+<vod_id>, with or without www / query / fragment.
static VOD_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?dlive\.tv/p/([^/?#+]+)\+([^/?#]+)").unwrap()
});

// Bare permlink form, as the API itself uses it.
static PERMLINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_-]+)\+([A-Za-z0-9_-]+)$").unwrap());

/// Identifies one past broadcast. Parsed once from user input, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRef {
    pub owner: String,
    pub vod_id: String,
}

impl BroadcastRef {
    /// Accepts a VOD page URL or a raw `owner+id` permlink.
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let input = input.trim();
        let captures = VOD_URL_REGEX
            .captures(input)
            .or_else(|| PERMLINK_REGEX.captures(input))
            .ok_or_else(|| ApiError::InvalidUrl(input.to_string()))?;
        Ok(Self {
            owner: captures[1].to_string(),
            vod_id: captures[2].to_string(),
        })
    }

    /// The permlink the GraphQL API expects.
    pub fn permlink(&self) -> String {
        format!("{}+{}", self.owner, self.vod_id)
    }
}

impl fmt::Display for BroadcastRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.owner, self.vod_id)
    }
}

/// Stream metadata for one broadcast, fetched once per download session.
#[derive(Debug, Clone)]
pub struct BroadcastMetadata {
    pub title: String,
    pub owner_display_name: String,
    /// 0 when the API did not report a usable length.
    pub duration_seconds: u64,
    pub master_playlist_url: String,
}

/// One entry of a channel's past-broadcast listing.
#[derive(Debug, Clone)]
pub struct RecentBroadcast {
    pub permlink: String,
    pub title: String,
    pub duration_seconds: Option<u64>,
    pub created_at_ms: Option<i64>,
    pub playback_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vod_page_url() {
        let parsed = BroadcastRef::parse("https://dlive.tv/p/somecreator+aBcD3f-g").unwrap();
        assert_eq!(parsed.owner, "somecreator");
        assert_eq!(parsed.vod_id, "aBcD3f-g");
        assert_eq!(parsed.permlink(), "somecreator+aBcD3f-g");
    }

    #[test]
    fn parses_www_url_with_query() {
        let parsed =
            BroadcastRef::parse("https://www.dlive.tv/p/creator+vod123?tab=chat#top").unwrap();
        assert_eq!(parsed.owner, "creator");
        assert_eq!(parsed.vod_id, "vod123");
    }

    #[test]
    fn parses_bare_permlink() {
        let parsed = BroadcastRef::parse("creator+vod123").unwrap();
        assert_eq!(parsed.permlink(), "creator+vod123");
    }

    #[test]
    fn rejects_unrelated_input() {
        for input in [
            "",
            "https://dlive.tv/somecreator",
            "https://example.com/p/creator+vod",
            "just words",
        ] {
            assert!(
                matches!(BroadcastRef::parse(input), Err(ApiError::InvalidUrl(_))),
                "expected InvalidUrl for {input:?}"
            );
        }
    }
}
