//! Progress reporting from the pipeline to a presentation layer.
//!
//! Events travel a bounded channel and are sent with `try_send`: a slow or
//! absent observer drops progress ticks instead of stalling the fetch loop.

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::DownloadError;
use crate::session::SessionState;

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    StateChanged(SessionState),
    Progress {
        segments_completed: usize,
        total_segments: usize,
        bytes_written: u64,
    },
    /// Terminal failure reason; emitted exactly once per failed session.
    Error(DownloadError),
}

/// Sending half handed to the orchestrator. A disabled sender drops
/// everything, for callers that do not observe progress.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<DownloadEvent>>,
}

impl EventSender {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: DownloadEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(err) = tx.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(DownloadEvent::Progress { .. }) => {
                    trace!("observer behind, dropping progress event");
                }
                mpsc::error::TrySendError::Full(event) => {
                    warn!(?event, "observer behind, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    trace!("observer gone, dropping event");
                }
            }
        }
    }
}

/// Creates the observer channel: the receiver goes to the presentation
/// layer, which drains it on its own schedule.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<DownloadEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx: Some(tx) }, rx)
}
