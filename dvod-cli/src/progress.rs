use dvod_engine::{DownloadEvent, SessionState};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::util::format_bytes;

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments")
        .unwrap()
        .progress_chars("=> ")
}

/// Drains the engine's event channel into a progress bar on its own task, so
/// the fetch loop never waits on terminal rendering. Runs until the channel
/// closes.
pub fn spawn(mut event_rx: mpsc::Receiver<DownloadEvent>, enabled: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        while let Some(event) = event_rx.recv().await {
            if !enabled {
                continue;
            }
            match event {
                DownloadEvent::StateChanged(state) => {
                    debug!(%state, "state changed");
                    if state == SessionState::Finalizing {
                        if let Some(bar) = &bar {
                            bar.set_message("finalizing");
                        }
                    }
                }
                DownloadEvent::Progress {
                    segments_completed,
                    total_segments,
                    bytes_written,
                } => {
                    let bar = bar.get_or_insert_with(|| {
                        let bar = ProgressBar::new(total_segments as u64);
                        bar.set_style(download_style());
                        bar
                    });
                    bar.set_position(segments_completed as u64);
                    bar.set_message(format!("downloading · {}", format_bytes(bytes_written)));
                }
                DownloadEvent::Error(error) => {
                    if let Some(bar) = bar.take() {
                        bar.abandon_with_message(format!("failed: {error}"));
                    }
                }
            }
        }
        if let Some(bar) = bar {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    })
}
