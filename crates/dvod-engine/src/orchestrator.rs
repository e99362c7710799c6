//! Drives one download end to end: metadata, variant selection, ordered
//! segment retrieval into a temporary file, atomic finalization.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dlive_api::{BroadcastRef, BroadcastResolver, MetadataClient};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, create_client};
use crate::error::DownloadError;
use crate::events::{self, DownloadEvent, EventSender};
use crate::fetcher::{SegmentFetcher, SegmentSource};
use crate::playlist::{PlaylistProvider, PlaylistResolver, Segment};
use crate::sanitize;
use crate::session::{DownloadSession, SessionState};

/// Cloneable handle for requesting cooperative cancellation of the download
/// currently driven by the orchestrator. Safe to invoke from any task.
#[derive(Clone)]
pub struct CancelTrigger {
    tx: broadcast::Sender<()>,
}

impl CancelTrigger {
    pub fn cancel(&self) {
        // Nobody listening means nothing to cancel.
        let _ = self.tx.send(());
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    resolver: Arc<dyn BroadcastResolver>,
    playlists: Arc<dyn PlaylistProvider>,
    fetcher: Arc<dyn SegmentSource>,
    events: EventSender,
    cancel_tx: broadcast::Sender<()>,
    // Destinations with a download in flight; guards same-path races.
    active_targets: Mutex<HashSet<PathBuf>>,
}

impl Orchestrator {
    /// Builds the orchestrator with the real HTTP-backed components and
    /// returns the observer side of the event channel.
    pub fn new(
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<DownloadEvent>), DownloadError> {
        let client = create_client(&config)?;
        let resolver = MetadataClient::new(client.clone())
            .with_retry_policy(config.metadata_retry.clone())
            .with_timeout(config.playlist_fetch_timeout);
        let playlists = PlaylistResolver::new(client.clone(), config.playlist_fetch_timeout);
        let fetcher = SegmentFetcher::new(
            client,
            config.segment_fetch_timeout,
            config.segment_retry.clone(),
        );
        let (events, event_rx) = events::channel(config.event_channel_capacity);
        let orchestrator = Self::with_components(
            config,
            Arc::new(resolver),
            Arc::new(playlists),
            Arc::new(fetcher),
            events,
        );
        Ok((orchestrator, event_rx))
    }

    /// Construction seam used by tests to inject deterministic components.
    pub fn with_components(
        config: EngineConfig,
        resolver: Arc<dyn BroadcastResolver>,
        playlists: Arc<dyn PlaylistProvider>,
        fetcher: Arc<dyn SegmentSource>,
        events: EventSender,
    ) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            config,
            resolver,
            playlists,
            fetcher,
            events,
            cancel_tx,
            active_targets: Mutex::new(HashSet::new()),
        }
    }

    pub fn cancel_trigger(&self) -> CancelTrigger {
        CancelTrigger {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Resolves metadata and the master playlist, leaving the session
    /// awaiting a variant selection. Backs a "list qualities" request.
    pub async fn start(&self, broadcast: BroadcastRef) -> Result<DownloadSession, DownloadError> {
        info!(broadcast = %broadcast, "resolving broadcast metadata");
        self.events
            .emit(DownloadEvent::StateChanged(SessionState::ResolvingMetadata));
        let metadata = match self.resolver.resolve(&broadcast).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(self.report_failure(e.into())),
        };

        self.events
            .emit(DownloadEvent::StateChanged(SessionState::ResolvingPlaylist));
        let variants = match self
            .playlists
            .list_variants(&metadata.master_playlist_url)
            .await
        {
            Ok(variants) => variants,
            Err(e) => return Err(self.report_failure(e)),
        };

        info!(
            title = %metadata.title,
            owner = %metadata.owner_display_name,
            variants = variants.len(),
            "broadcast resolved"
        );
        let session = DownloadSession::new(broadcast, metadata, variants);
        self.events.emit(DownloadEvent::StateChanged(
            SessionState::AwaitingVariantSelection,
        ));
        Ok(session)
    }

    /// Downloads the selected variant into `destination_dir`, returning the
    /// final file path. A failed or cancelled session can be passed again;
    /// it always starts over with a fresh temporary file.
    pub async fn download(
        &self,
        session: &mut DownloadSession,
        variant_index: u32,
        destination_dir: &Path,
        filename_override: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        session.reset_attempt();
        match self
            .run_download(session, variant_index, destination_dir, filename_override)
            .await
        {
            Ok(path) => Ok(path),
            Err(DownloadError::Cancelled) => {
                self.cleanup_temp(session).await;
                self.set_state(session, SessionState::Cancelled);
                Err(DownloadError::Cancelled)
            }
            Err(error) => {
                self.cleanup_temp(session).await;
                self.set_state(session, SessionState::Failed);
                self.events.emit(DownloadEvent::Error(error.clone()));
                Err(error)
            }
        }
    }

    async fn run_download(
        &self,
        session: &mut DownloadSession,
        variant_index: u32,
        destination_dir: &Path,
        filename_override: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let available = session.variants.len();
        let variant = variant_index
            .checked_sub(1)
            .and_then(|i| session.variants.get(i as usize))
            .cloned()
            .ok_or(DownloadError::InvalidSelection {
                index: variant_index,
                available,
            })?;

        let file_name = match filename_override {
            Some(name) => sanitize::sanitize_override(name),
            None => sanitize::build_filename(&session.metadata, &variant),
        };
        let final_path = destination_dir.join(&file_name);
        let _target = self.claim_target(&final_path)?;

        let segments = self.playlists.list_segments(&variant).await?;
        info!(
            variant = %variant.label,
            segments = segments.len(),
            path = %final_path.display(),
            "starting download"
        );
        session.selected_variant = Some(variant);
        session.segments = segments.clone();

        fs::create_dir_all(destination_dir).await?;
        // Colocated with the destination so the final rename stays atomic.
        let temp_path = destination_dir.join(format!(".{file_name}.part"));
        let mut file = fs::File::create(&temp_path).await?;
        session.temp_path = Some(temp_path.clone());

        self.set_state(session, SessionState::Fetching);
        let mut cancel_rx = self.cancel_tx.subscribe();
        if self.config.prefetch_concurrency <= 1 {
            self.fetch_sequential(session, &segments, &mut file, &mut cancel_rx)
                .await?;
        } else {
            self.fetch_with_prefetch(session, &segments, &mut file, &mut cancel_rx)
                .await?;
        }

        self.set_state(session, SessionState::Finalizing);
        // Rewound streaming attempts can leave stale bytes past the cursor.
        file.set_len(session.bytes_written).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &final_path).await?;
        session.temp_path = None;
        session.final_path = Some(final_path.clone());
        self.set_state(session, SessionState::Completed);
        info!(
            path = %final_path.display(),
            bytes = session.bytes_written,
            "download complete"
        );
        Ok(final_path)
    }

    /// Single-worker mode: each segment streams straight into the temp file.
    async fn fetch_sequential(
        &self,
        session: &mut DownloadSession,
        segments: &[Segment],
        file: &mut fs::File,
        cancel_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), DownloadError> {
        let total_segments = segments.len();
        for segment in segments {
            tokio::select! {
                biased;
                _ = cancel_rx.recv() => return Err(DownloadError::Cancelled),
                fetched = self.fetcher.fetch_into(segment, file) => {
                    session.bytes_written += fetched?;
                    session.segments_completed += 1;
                    self.emit_progress(session, total_segments);
                }
            }
        }
        Ok(())
    }

    /// Prefetch mode: a bounded pool fetches ahead of the write cursor into
    /// a reorder buffer keyed by sequence number; bytes are appended in
    /// strictly increasing sequence order regardless of completion order.
    async fn fetch_with_prefetch(
        &self,
        session: &mut DownloadSession,
        segments: &[Segment],
        file: &mut fs::File,
        cancel_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), DownloadError> {
        let total_segments = segments.len();
        let concurrency = self.config.prefetch_concurrency;
        let mut backlog = segments.iter();
        let mut in_flight = FuturesUnordered::new();
        let mut ready: BTreeMap<u64, Bytes> = BTreeMap::new();
        let mut next_to_write = segments.first().map(|s| s.sequence_number).unwrap_or(0);

        loop {
            // Issue in sequence order, capped both in flight and buffered.
            while in_flight.len() < concurrency && ready.len() < concurrency * 2 {
                let Some(segment) = backlog.next() else { break };
                let fetcher = Arc::clone(&self.fetcher);
                let segment = segment.clone();
                in_flight.push(async move {
                    let fetched = fetcher.fetch(&segment).await;
                    (segment.sequence_number, fetched)
                });
            }
            if session.segments_completed == total_segments {
                return Ok(());
            }

            tokio::select! {
                biased;
                // Dropping in-flight futures aborts their connections.
                _ = cancel_rx.recv() => return Err(DownloadError::Cancelled),
                Some((sequence, fetched)) = in_flight.next() => {
                    let bytes = fetched?;
                    debug!(sequence, bytes = bytes.len(), "segment ready");
                    ready.insert(sequence, bytes);
                    while let Some(entry) = ready.first_entry() {
                        if *entry.key() != next_to_write {
                            break;
                        }
                        let (_, bytes) = entry.remove_entry();
                        file.write_all(&bytes).await?;
                        session.bytes_written += bytes.len() as u64;
                        session.segments_completed += 1;
                        next_to_write += 1;
                        self.emit_progress(session, total_segments);
                    }
                }
            }
        }
    }

    fn emit_progress(&self, session: &DownloadSession, total_segments: usize) {
        self.events.emit(DownloadEvent::Progress {
            segments_completed: session.segments_completed,
            total_segments,
            bytes_written: session.bytes_written,
        });
    }

    fn set_state(&self, session: &mut DownloadSession, state: SessionState) {
        debug!(%state, "session state changed");
        session.state = state;
        self.events.emit(DownloadEvent::StateChanged(state));
    }

    fn report_failure(&self, error: DownloadError) -> DownloadError {
        self.events
            .emit(DownloadEvent::StateChanged(SessionState::Failed));
        self.events.emit(DownloadEvent::Error(error.clone()));
        error
    }

    fn claim_target(&self, path: &Path) -> Result<TargetGuard<'_>, DownloadError> {
        let mut targets = self.active_targets.lock();
        if !targets.insert(path.to_path_buf()) {
            return Err(DownloadError::Conflict(path.to_path_buf()));
        }
        Ok(TargetGuard {
            targets: &self.active_targets,
            path: path.to_path_buf(),
        })
    }

    /// Removes the temp file before an error or cancellation surfaces;
    /// cleanup failing is logged and never masks the original outcome.
    async fn cleanup_temp(&self, session: &mut DownloadSession) {
        if let Some(temp_path) = session.temp_path.take() {
            if let Err(e) = fs::remove_file(&temp_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %temp_path.display(),
                        error = %e,
                        "failed to remove temporary file"
                    );
                }
            }
        }
    }
}

struct TargetGuard<'a> {
    targets: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        self.targets.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::Variant;
    use async_trait::async_trait;
    use dlive_api::{ApiError, BroadcastMetadata};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct StubResolver {
        metadata: BroadcastMetadata,
    }

    #[async_trait]
    impl BroadcastResolver for StubResolver {
        async fn resolve(&self, _: &BroadcastRef) -> Result<BroadcastMetadata, ApiError> {
            Ok(self.metadata.clone())
        }
    }

    struct StubPlaylists {
        variants: Vec<Variant>,
        segments: Vec<Segment>,
    }

    #[async_trait]
    impl PlaylistProvider for StubPlaylists {
        async fn list_variants(&self, _: &str) -> Result<Vec<Variant>, DownloadError> {
            Ok(self.variants.clone())
        }

        async fn list_segments(&self, _: &Variant) -> Result<Vec<Segment>, DownloadError> {
            Ok(self.segments.clone())
        }
    }

    #[derive(Default)]
    struct StubFetcher {
        blobs: HashMap<u64, Bytes>,
        delays: HashMap<u64, Duration>,
        failures: Mutex<HashMap<u64, DownloadError>>,
        calls: Mutex<Vec<u64>>,
        on_fetch: Mutex<Option<Box<dyn Fn(u64) + Send + Sync>>>,
    }

    impl StubFetcher {
        fn calls(&self) -> Vec<u64> {
            self.calls.lock().clone()
        }

        fn fail_segment(&self, sequence: u64, status: Option<u16>) {
            self.failures.lock().insert(
                sequence,
                DownloadError::SegmentFetch {
                    sequence,
                    status,
                    message: "stubbed failure".to_string(),
                },
            );
        }
    }

    #[async_trait]
    impl SegmentSource for StubFetcher {
        async fn fetch(&self, segment: &Segment) -> Result<Bytes, DownloadError> {
            let sequence = segment.sequence_number;
            self.calls.lock().push(sequence);
            if let Some(hook) = &*self.on_fetch.lock() {
                hook(sequence);
            }
            if let Some(delay) = self.delays.get(&sequence) {
                tokio::time::sleep(*delay).await;
            }
            if let Some(error) = self.failures.lock().get(&sequence) {
                return Err(error.clone());
            }
            Ok(self
                .blobs
                .get(&sequence)
                .cloned()
                .unwrap_or_else(|| Bytes::from(format!("segment-{sequence}"))))
        }

        async fn fetch_into(
            &self,
            segment: &Segment,
            sink: &mut dyn crate::fetcher::SegmentSink,
        ) -> Result<u64, DownloadError> {
            let bytes = self.fetch(segment).await?;
            sink.write_all(&bytes).await?;
            Ok(bytes.len() as u64)
        }
    }

    fn test_metadata() -> BroadcastMetadata {
        BroadcastMetadata {
            title: "Test broadcast".to_string(),
            owner_display_name: "tester".to_string(),
            duration_seconds: 120,
            master_playlist_url: "https://cdn.example/master.m3u8".to_string(),
        }
    }

    fn test_variants() -> Vec<Variant> {
        (1..=2)
            .map(|index| Variant {
                index,
                label: format!("{}p", 1080 / index),
                media_playlist_url: format!("https://cdn.example/v{index}/index.m3u8"),
                resolution: None,
                bandwidth: Some(1_000_000 / index as u64),
            })
            .collect()
    }

    fn test_segments(count: u64) -> Vec<Segment> {
        (0..count)
            .map(|sequence| Segment {
                sequence_number: sequence,
                url: format!("https://cdn.example/v1/seg{sequence}.ts"),
                duration_seconds: 6.0,
            })
            .collect()
    }

    fn build(
        concurrency: usize,
        fetcher: Arc<StubFetcher>,
        segments: Vec<Segment>,
        event_capacity: usize,
    ) -> (Arc<Orchestrator>, mpsc::Receiver<DownloadEvent>) {
        let config = EngineConfig {
            prefetch_concurrency: concurrency,
            ..EngineConfig::default()
        };
        let (events, event_rx) = events::channel(event_capacity);
        let orchestrator = Orchestrator::with_components(
            config,
            Arc::new(StubResolver {
                metadata: test_metadata(),
            }),
            Arc::new(StubPlaylists {
                variants: test_variants(),
                segments,
            }),
            fetcher,
            events,
        );
        (Arc::new(orchestrator), event_rx)
    }

    fn broadcast_ref() -> BroadcastRef {
        BroadcastRef {
            owner: "tester".to_string(),
            vod_id: "vod1".to_string(),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<DownloadEvent>) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn start_leaves_session_awaiting_selection() {
        let (orchestrator, mut rx) = build(3, Arc::new(StubFetcher::default()), test_segments(3), 64);
        let session = orchestrator.start(broadcast_ref()).await.unwrap();

        assert_eq!(session.state, SessionState::AwaitingVariantSelection);
        assert_eq!(session.metadata.title, "Test broadcast");
        let indices: Vec<u32> = session.variants.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![1, 2]);

        let states: Vec<SessionState> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                DownloadEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::ResolvingMetadata,
                SessionState::ResolvingPlaylist,
                SessionState::AwaitingVariantSelection,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_writes_in_sequence_order_despite_completion_order() {
        let fetcher = Arc::new(StubFetcher {
            blobs: HashMap::from([
                (0, Bytes::from_static(b"AAAA")),
                (1, Bytes::from_static(b"BB")),
                (2, Bytes::from_static(b"C")),
            ]),
            // Sequence 0 finishes last; 1 and 2 complete first.
            delays: HashMap::from([
                (0, Duration::from_millis(50)),
                (2, Duration::from_millis(10)),
            ]),
            ..StubFetcher::default()
        });
        let (orchestrator, mut rx) = build(3, Arc::clone(&fetcher), test_segments(3), 64);
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        let path = orchestrator
            .download(&mut session, 1, dir.path(), Some("out.mp4"))
            .await
            .unwrap();

        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(std::fs::read(&path).unwrap(), b"AAAABBC");
        assert_eq!(session.bytes_written, 7);
        let mut calls = fetcher.calls();
        calls.sort_unstable();
        assert_eq!(calls, vec![0, 1, 2]);

        let progress: Vec<(usize, usize, u64)> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                DownloadEvent::Progress {
                    segments_completed,
                    total_segments,
                    bytes_written,
                } => Some((segments_completed, total_segments, bytes_written)),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress.last(), Some(&(3, 3, 7)));
    }

    #[tokio::test]
    async fn sequential_mode_streams_into_the_file() {
        let fetcher = Arc::new(StubFetcher {
            blobs: HashMap::from([
                (0, Bytes::from_static(b"first-")),
                (1, Bytes::from_static(b"second")),
            ]),
            ..StubFetcher::default()
        });
        let (orchestrator, _rx) = build(1, Arc::clone(&fetcher), test_segments(2), 64);
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        let path = orchestrator
            .download(&mut session, 1, dir.path(), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"first-second");
        assert_eq!(fetcher.calls(), vec![0, 1]);
        // Default name comes from the sanitizer collaborator.
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "tester_Test-broadcast_1080p.mp4"
        );
    }

    #[tokio::test]
    async fn failed_segment_aborts_session_and_cleans_up() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.fail_segment(2, Some(404));
        let (orchestrator, mut rx) = build(1, Arc::clone(&fetcher), test_segments(5), 64);
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        let error = orchestrator
            .download(&mut session, 1, dir.path(), Some("vod.mp4"))
            .await
            .unwrap_err();

        match error {
            DownloadError::SegmentFetch { sequence, .. } => assert_eq!(sequence, 2),
            other => panic!("expected SegmentFetch, got {other:?}"),
        }
        assert_eq!(session.state, SessionState::Failed);
        assert!(session.temp_path.is_none());
        // No destination file and no leftover temp file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let errors: Vec<DownloadError> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                DownloadEvent::Error(error) => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1, "exactly one terminal error event");
    }

    #[tokio::test]
    async fn retry_after_failure_starts_fresh_and_succeeds() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.fail_segment(1, Some(500));
        let (orchestrator, _rx) = build(1, Arc::clone(&fetcher), test_segments(3), 64);
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        orchestrator
            .download(&mut session, 1, dir.path(), Some("vod.mp4"))
            .await
            .unwrap_err();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        fetcher.failures.lock().clear();
        let path = orchestrator
            .download(&mut session, 1, dir.path(), Some("vod.mp4"))
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"segment-0segment-1segment-2"
        );
    }

    #[tokio::test]
    async fn cancellation_stops_issuing_fetches_and_leaves_nothing() {
        let fetcher = Arc::new(StubFetcher::default());
        let (orchestrator, mut rx) = build(1, Arc::clone(&fetcher), test_segments(5), 64);
        let trigger = orchestrator.cancel_trigger();
        // Cancel while the second segment is being fetched; it still
        // completes, then the loop must stop before issuing segment 2.
        *fetcher.on_fetch.lock() = Some(Box::new(move |sequence| {
            if sequence == 1 {
                trigger.cancel();
            }
        }));
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        let error = orchestrator
            .download(&mut session, 1, dir.path(), Some("vod.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(error, DownloadError::Cancelled));
        assert_eq!(session.state, SessionState::Cancelled);
        assert_eq!(fetcher.calls(), vec![0, 1]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let events = drain(&mut rx);
        assert!(events.iter().any(|event| matches!(
            event,
            DownloadEvent::StateChanged(SessionState::Cancelled)
        )));
        // Cancellation is not an error.
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, DownloadEvent::Error(_)))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_same_destination_conflicts() {
        let fetcher = Arc::new(StubFetcher {
            delays: HashMap::from([
                (0, Duration::from_millis(100)),
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(100)),
            ]),
            ..StubFetcher::default()
        });
        let (orchestrator, _rx) = build(2, fetcher, test_segments(3), 64);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let dest = dest.clone();
            tokio::spawn(async move {
                let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
                orchestrator
                    .download(&mut session, 1, &dest, Some("same.mp4"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut second_session = orchestrator.start(broadcast_ref()).await.unwrap();
        let second = orchestrator
            .download(&mut second_session, 1, &dest, Some("same.mp4"))
            .await;
        assert!(matches!(second, Err(DownloadError::Conflict(_))));

        // The first download is unaffected by the rejected second one.
        let first_path = first.await.unwrap().unwrap();
        assert!(first_path.exists());
    }

    #[tokio::test]
    async fn out_of_range_selection_is_rejected() {
        let (orchestrator, _rx) = build(2, Arc::new(StubFetcher::default()), test_segments(2), 64);
        let dir = tempfile::tempdir().unwrap();
        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();

        for index in [0, 3] {
            let error = orchestrator
                .download(&mut session, index, dir.path(), None)
                .await
                .unwrap_err();
            match error {
                DownloadError::InvalidSelection { available, .. } => assert_eq!(available, 2),
                other => panic!("expected InvalidSelection, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_observer_never_stalls_the_download() {
        // Capacity 1 and nobody draining: progress events are dropped, the
        // download still completes.
        let (orchestrator, rx) = build(2, Arc::new(StubFetcher::default()), test_segments(20), 1);
        let dir = tempfile::tempdir().unwrap();

        let mut session = orchestrator.start(broadcast_ref()).await.unwrap();
        let path = orchestrator
            .download(&mut session, 1, dir.path(), Some("vod.mp4"))
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(session.segments_completed, 20);
        drop(rx);
    }
}
