//! Per-segment HTTP retrieval with bounded retry and jittered backoff.

use std::io::SeekFrom;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_retry::RetryPolicy;
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::DownloadError;
use crate::playlist::Segment;

/// Output sink for the streaming fetch path. Seekable so a failed attempt
/// can be rewound and rewritten by the next one.
pub trait SegmentSink: AsyncWrite + AsyncSeek + Unpin + Send {}
impl<T: AsyncWrite + AsyncSeek + Unpin + Send> SegmentSink for T {}

#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetches a whole segment into memory.
    async fn fetch(&self, segment: &Segment) -> Result<Bytes, DownloadError>;

    /// Streams a segment directly into `sink`, returning the byte count of
    /// the successful attempt. The sink is rewound to its position at entry
    /// before every attempt, so no failed attempt's bytes survive a retry.
    async fn fetch_into(
        &self,
        segment: &Segment,
        sink: &mut dyn SegmentSink,
    ) -> Result<u64, DownloadError>;
}

pub struct SegmentFetcher {
    client: Client,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

enum AttemptError {
    /// Connection/timeout/5xx failures, worth another attempt.
    Transient(DownloadError),
    Fatal(DownloadError),
}

impl SegmentFetcher {
    pub fn new(client: Client, fetch_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            fetch_timeout,
            retry,
        }
    }

    /// One full attempt: fresh request, status classification, body streamed
    /// into the sink.
    async fn attempt(
        &self,
        segment: &Segment,
        sink: &mut dyn SegmentSink,
    ) -> Result<u64, AttemptError> {
        let mut response = match self
            .client
            .get(&segment.url)
            .timeout(self.fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                return Err(AttemptError::Transient(e.into()));
            }
            Err(e) => return Err(AttemptError::Fatal(e.into())),
        };

        let status = response.status();
        if !status.is_success() {
            let error = DownloadError::SegmentFetch {
                sequence: segment.sequence_number,
                status: Some(status.as_u16()),
                message: format!("HTTP {status} for {}", segment.url),
            };
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(AttemptError::Transient(error))
            } else {
                Err(AttemptError::Fatal(error))
            };
        }

        let mut written = 0u64;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    sink.write_all(&chunk)
                        .await
                        .map_err(|e| AttemptError::Fatal(e.into()))?;
                    written += chunk.len() as u64;
                }
                Ok(None) => return Ok(written),
                // A broken body stream gets a fresh request.
                Err(e) => return Err(AttemptError::Transient(e.into())),
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        segment: &Segment,
        sink: &mut dyn SegmentSink,
    ) -> Result<u64, DownloadError> {
        let start = sink.stream_position().await?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            sink.seek(SeekFrom::Start(start)).await?;
            let error = match self.attempt(segment, sink).await {
                Ok(written) => {
                    debug!(
                        sequence = segment.sequence_number,
                        bytes = written,
                        attempts,
                        "segment fetched"
                    );
                    return Ok(written);
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Transient(error)) => error,
            };
            if attempts >= self.retry.max_attempts {
                return Err(DownloadError::SegmentFetch {
                    sequence: segment.sequence_number,
                    status: match &error {
                        DownloadError::SegmentFetch { status, .. } => *status,
                        _ => None,
                    },
                    message: format!(
                        "retry budget ({}) exhausted: {error}",
                        self.retry.max_attempts
                    ),
                });
            }
            let delay = self.retry.delay_for(attempts);
            debug!(
                sequence = segment.sequence_number,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "segment fetch failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SegmentSource for SegmentFetcher {
    async fn fetch(&self, segment: &Segment) -> Result<Bytes, DownloadError> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        let written = self.fetch_with_retries(segment, &mut buffer).await?;
        let mut bytes = buffer.into_inner();
        // A longer failed attempt may have left bytes past the final length.
        bytes.truncate(written as usize);
        Ok(Bytes::from(bytes))
    }

    async fn fetch_into(
        &self,
        segment: &Segment,
        sink: &mut dyn SegmentSink,
    ) -> Result<u64, DownloadError> {
        self.fetch_with_retries(segment, sink).await
    }
}
