//! Filename sanitizing, kept as pure functions with no filesystem access.

use std::sync::LazyLock;

use dlive_api::BroadcastMetadata;
use regex::Regex;

use crate::playlist::Variant;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

const MAX_FILENAME_CHARS: usize = 150;

/// Collapses anything outside `[A-Za-z0-9._-]` (path separators and reserved
/// characters included) into `-` and caps the length; never returns an empty
/// string.
pub fn sanitize_filename(raw: &str) -> String {
    let collapsed = UNSAFE_CHARS.replace_all(raw.trim(), "-");
    let trimmed = collapsed.trim_matches(['-', '_']);
    let base = if trimmed.is_empty() { "video" } else { trimmed };
    base.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Default output name: `<owner>_<title>_<label>.mp4`.
pub fn build_filename(metadata: &BroadcastMetadata, variant: &Variant) -> String {
    format!(
        "{}_{}_{}.mp4",
        sanitize_filename(&metadata.owner_display_name),
        sanitize_filename(&metadata.title),
        sanitize_filename(&variant.label),
    )
}

/// Applies the sanitizer to a caller-supplied name, appending the default
/// container extension when none was given.
pub fn sanitize_override(raw: &str) -> String {
    let name = sanitize_filename(raw);
    if name.rsplit('.').nth(1).is_some() {
        name
    } else {
        format!("{name}.mp4")
    }
}
