//! Master and media playlist resolution.
//!
//! Fetching and parsing are split: the parse functions are pure so the
//! manifest handling can be tested without a network.

use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;

/// One selectable quality of a broadcast, in master-playlist order.
/// `index` is 1-based and stable for a given metadata fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub index: u32,
    pub label: String,
    pub media_playlist_url: String,
    pub resolution: Option<String>,
    pub bandwidth: Option<u64>,
}

/// One media segment. Sequence numbers are assigned from the manifest's
/// declared base in manifest order and define the final concatenation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence_number: u64,
    pub url: String,
    pub duration_seconds: f32,
}

#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn list_variants(&self, master_url: &str) -> Result<Vec<Variant>, DownloadError>;
    async fn list_segments(&self, variant: &Variant) -> Result<Vec<Segment>, DownloadError>;
}

pub struct PlaylistResolver {
    client: Client,
    fetch_timeout: Duration,
}

impl PlaylistResolver {
    pub fn new(client: Client, fetch_timeout: Duration) -> Self {
        Self {
            client,
            fetch_timeout,
        }
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.fetch_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(200);
            return Err(DownloadError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl PlaylistProvider for PlaylistResolver {
    async fn list_variants(&self, master_url: &str) -> Result<Vec<Variant>, DownloadError> {
        let url = parse_url(master_url)?;
        let bytes = self.fetch_manifest(&url).await?;
        parse_master_variants(&bytes, &url)
    }

    async fn list_segments(&self, variant: &Variant) -> Result<Vec<Segment>, DownloadError> {
        let url = parse_url(&variant.media_playlist_url)?;
        let bytes = self.fetch_manifest(&url).await?;
        parse_media_segments(&bytes, &url)
    }
}

fn parse_url(url: &str) -> Result<Url, DownloadError> {
    Url::parse(url)
        .map_err(|e| DownloadError::PlaylistParse(format!("invalid playlist URL {url}: {e}")))
}

fn join_url(base: &Url, uri: &str) -> Result<String, DownloadError> {
    base.join(uri)
        .map(|joined| joined.to_string())
        .map_err(|e| DownloadError::PlaylistParse(format!("cannot resolve URI {uri}: {e}")))
}

/// Parses a master playlist into its variants, preserving manifest order.
///
/// A media playlist is accepted as a degenerate master with a single
/// "Source" variant, since some broadcasts publish their playback URL that
/// way.
pub fn parse_master_variants(bytes: &[u8], master_url: &Url) -> Result<Vec<Variant>, DownloadError> {
    match parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(playlist)) => master_to_variants(playlist, master_url),
        Ok(Playlist::MediaPlaylist(playlist)) => {
            if playlist.segments.is_empty() {
                return Err(DownloadError::PlaylistParse(
                    "manifest lists no variants or segments".to_string(),
                ));
            }
            Ok(vec![Variant {
                index: 1,
                label: "Source".to_string(),
                media_playlist_url: master_url.to_string(),
                resolution: None,
                bandwidth: None,
            }])
        }
        Err(e) => Err(DownloadError::PlaylistParse(format!(
            "cannot parse master playlist: {e}"
        ))),
    }
}

fn master_to_variants(
    playlist: MasterPlaylist,
    master_url: &Url,
) -> Result<Vec<Variant>, DownloadError> {
    let mut variants = Vec::with_capacity(playlist.variants.len());
    for stream in playlist.variants.into_iter().filter(|v| !v.is_i_frame) {
        let index = variants.len() as u32 + 1;
        let resolution = stream
            .resolution
            .map(|r| format!("{}x{}", r.width, r.height));
        let label = stream
            .video
            .filter(|v| !v.is_empty())
            .or_else(|| resolution.clone())
            .unwrap_or_else(|| format!("variant-{index}"));
        variants.push(Variant {
            index,
            label,
            media_playlist_url: join_url(master_url, &stream.uri)?,
            resolution,
            bandwidth: stream.average_bandwidth.or(Some(stream.bandwidth)),
        });
    }
    if variants.is_empty() {
        return Err(DownloadError::PlaylistParse(
            "master playlist lists no variants".to_string(),
        ));
    }
    Ok(variants)
}

/// Parses a media playlist into ordered segments.
///
/// Relative URIs resolve against the media playlist's own URL. An
/// `EXT-X-MAP` init section becomes the leading segment. A playlist without
/// `EXT-X-ENDLIST` still yields whatever it lists; VODs are assumed complete.
pub fn parse_media_segments(bytes: &[u8], media_url: &Url) -> Result<Vec<Segment>, DownloadError> {
    let playlist = match parse_playlist_res(bytes) {
        Ok(Playlist::MediaPlaylist(playlist)) => playlist,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(DownloadError::PlaylistParse(
                "expected a media playlist, got a master playlist".to_string(),
            ));
        }
        Err(e) => {
            return Err(DownloadError::PlaylistParse(format!(
                "cannot parse media playlist: {e}"
            )));
        }
    };
    media_to_segments(playlist, media_url)
}

fn media_to_segments(
    playlist: MediaPlaylist,
    media_url: &Url,
) -> Result<Vec<Segment>, DownloadError> {
    let mut segments = Vec::with_capacity(playlist.segments.len() + 1);
    let mut sequence = playlist.media_sequence;

    if let Some(map) = playlist.segments.first().and_then(|s| s.map.as_ref()) {
        segments.push(Segment {
            sequence_number: sequence,
            url: join_url(media_url, &map.uri)?,
            duration_seconds: 0.0,
        });
        sequence += 1;
    }

    for media_segment in &playlist.segments {
        segments.push(Segment {
            sequence_number: sequence,
            url: join_url(media_url, &media_segment.uri)?,
            duration_seconds: media_segment.duration,
        });
        sequence += 1;
    }

    if segments.is_empty() {
        return Err(DownloadError::PlaylistParse(
            "media playlist contains no segments".to_string(),
        ));
    }
    if !playlist.end_list {
        debug!(url = %media_url, "playlist has no ENDLIST marker, treating listed segments as complete");
    }
    Ok(segments)
}
