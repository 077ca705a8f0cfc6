//! Stream fetching and forwarding.
//!
//! [`fetch_events`] turns a source's chunk stream into a lazy sequence of
//! chunks annotated with progress. [`StreamFetcher::forward`] drives that
//! sequence into a sink with `write_all`, so a slow sink suspends the fetch
//! loop instead of letting it buffer ahead.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::DEFAULT_FORWARD_CHUNK_SIZE;
use crate::error::MuxError;
use crate::progress::{SourceWriter, TotalBytes};
use crate::source::{SourceRequest, SourceStream, StreamSource, TrackType};

/// Progress event emitted for every received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Bytes in this chunk.
    pub delta: u64,
    /// Bytes received so far, including this chunk.
    pub downloaded: u64,
    pub total: TotalBytes,
}

#[derive(Debug, Clone)]
pub struct FetchedChunk {
    pub data: Bytes,
    pub progress: FetchProgress,
}

pub type FetchEvents = BoxStream<'static, Result<FetchedChunk, MuxError>>;

/// Annotate each chunk of `stream` with its progress event.
///
/// Chunk order is preserved. A chunk error becomes a transport error for
/// `track`.
pub fn fetch_events(track: TrackType, stream: SourceStream) -> FetchEvents {
    let total = stream.total;
    let mut downloaded = 0u64;

    stream
        .chunks
        .map(move |chunk| {
            let data = chunk.map_err(|e| MuxError::transport(track, e))?;
            let delta = data.len() as u64;
            downloaded += delta;
            Ok(FetchedChunk {
                data,
                progress: FetchProgress {
                    delta,
                    downloaded,
                    total,
                },
            })
        })
        .boxed()
}

/// Fetches one track from a stream source.
pub struct StreamFetcher {
    source: Arc<dyn StreamSource>,
    request: SourceRequest,
    forward_chunk_size: usize,
}

impl StreamFetcher {
    pub fn new(source: Arc<dyn StreamSource>, request: SourceRequest) -> Self {
        Self {
            source,
            request,
            forward_chunk_size: DEFAULT_FORWARD_CHUNK_SIZE,
        }
    }

    pub fn with_forward_chunk_size(mut self, size: usize) -> Self {
        self.forward_chunk_size = size.max(1);
        self
    }

    pub fn track(&self) -> TrackType {
        self.request.track
    }

    pub fn request(&self) -> &SourceRequest {
        &self.request
    }

    /// Open the source and return its progress-annotated chunks.
    pub async fn fetch(&self) -> Result<FetchEvents, MuxError> {
        let stream = self.source.open(&self.request).await?;
        Ok(fetch_events(self.request.track, stream))
    }

    /// Fetch the whole stream into `sink`, recording progress through
    /// `writer`.
    ///
    /// The sink is shut down and dropped once the stream ends, which signals
    /// end of input to whatever reads it. Write failures are mapped with
    /// `on_write_error`. Every suspension point observes `token`.
    ///
    /// Returns the number of bytes delivered.
    #[instrument(skip_all, fields(track = %self.request.track))]
    pub async fn forward<W, F>(
        &self,
        mut sink: W,
        writer: SourceWriter,
        token: CancellationToken,
        on_write_error: F,
    ) -> Result<u64, MuxError>
    where
        W: AsyncWrite + Unpin + Send,
        F: Fn(io::Error) -> MuxError + Send,
    {
        let mut events = tokio::select! {
            _ = token.cancelled() => return Err(MuxError::Cancelled),
            events = self.fetch() => events?,
        };
        debug!(quality = %self.request.quality, "Stream opened");

        let mut delivered = 0u64;
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(MuxError::Cancelled),
                next = events.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            writer.record(&chunk.progress);

            for piece in chunk.data.chunks(self.forward_chunk_size) {
                tokio::select! {
                    _ = token.cancelled() => return Err(MuxError::Cancelled),
                    written = sink.write_all(piece) => written.map_err(&on_write_error)?,
                }
            }
            delivered += chunk.progress.delta;
        }

        tokio::select! {
            _ = token.cancelled() => return Err(MuxError::Cancelled),
            closed = sink.shutdown() => closed.map_err(&on_write_error)?,
        }
        drop(sink);

        debug!(bytes = delivered, "Stream delivered");
        Ok(delivered)
    }
}
