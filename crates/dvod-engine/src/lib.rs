//! # dvod-engine
//!
//! Download pipeline for DLive past broadcasts: resolves a broadcast to its
//! HLS quality variants, fetches the chosen variant's segments with bounded
//! retry, and reassembles them in sequence order into a single output file
//! with safe temporary-file handling, progress events and cooperative
//! cancellation.

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod orchestrator;
pub mod playlist;
pub mod sanitize;
pub mod session;

pub use config::{EngineConfig, create_client};
pub use error::DownloadError;
pub use events::{DownloadEvent, EventSender};
pub use fetcher::{SegmentFetcher, SegmentSink, SegmentSource};
pub use orchestrator::{CancelTrigger, Orchestrator};
pub use playlist::{PlaylistProvider, PlaylistResolver, Segment, Variant};
pub use session::{DownloadSession, SessionState};

// Re-export the policy type callers tune through EngineConfig.
pub use http_retry::RetryPolicy;
