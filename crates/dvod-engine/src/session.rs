use std::fmt;
use std::path::PathBuf;

use dlive_api::{BroadcastMetadata, BroadcastRef};

use crate::playlist::{Segment, Variant};

/// States of one download session. Transitions are monotonic; `Cancelled`
/// and `Failed` are terminal and reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ResolvingMetadata,
    ResolvingPlaylist,
    AwaitingVariantSelection,
    Fetching,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::ResolvingMetadata => "resolving-metadata",
            SessionState::ResolvingPlaylist => "resolving-playlist",
            SessionState::AwaitingVariantSelection => "awaiting-variant-selection",
            SessionState::Fetching => "fetching",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Mutable record of one download, owned exclusively by the orchestrator.
///
/// `temp_path` is set only while the session is fetching or finalizing; on
/// success `final_path` is set and the temp file no longer exists; after a
/// failure or cancellation neither file is left behind.
#[derive(Debug)]
pub struct DownloadSession {
    pub broadcast: BroadcastRef,
    pub metadata: BroadcastMetadata,
    pub variants: Vec<Variant>,
    pub state: SessionState,
    pub selected_variant: Option<Variant>,
    pub segments: Vec<Segment>,
    pub segments_completed: usize,
    pub bytes_written: u64,
    pub temp_path: Option<PathBuf>,
    pub final_path: Option<PathBuf>,
}

impl DownloadSession {
    pub fn new(broadcast: BroadcastRef, metadata: BroadcastMetadata, variants: Vec<Variant>) -> Self {
        Self {
            broadcast,
            metadata,
            variants,
            state: SessionState::AwaitingVariantSelection,
            selected_variant: None,
            segments: Vec::new(),
            segments_completed: 0,
            bytes_written: 0,
            temp_path: None,
            final_path: None,
        }
    }

    /// Clears per-attempt progress so a failed or cancelled session can be
    /// retried from scratch (partial downloads are never resumed).
    pub(crate) fn reset_attempt(&mut self) {
        self.selected_variant = None;
        self.segments.clear();
        self.segments_completed = 0;
        self.bytes_written = 0;
        self.temp_path = None;
        self.final_path = None;
    }
}
