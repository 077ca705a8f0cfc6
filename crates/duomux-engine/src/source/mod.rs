//! The stream source capability.
//!
//! A [`StreamSource`] turns a descriptor plus a quality selector into a lazy,
//! finite byte stream with an optional total size. Resolving media
//! identifiers into concrete stream URLs happens upstream of this crate.

mod http;

pub use http::HttpSource;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{BoxError, MuxError};
use crate::progress::TotalBytes;

/// Default quality selector passed to sources.
pub const DEFAULT_QUALITY: &str = "highest";

/// Which elementary stream a source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    /// Source-specific descriptor (for [`HttpSource`], a URL).
    pub descriptor: String,
    /// Track the stream is routed to.
    pub track: TrackType,
    /// Opaque quality selector forwarded to the source.
    pub quality: String,
}

impl SourceRequest {
    pub fn new(descriptor: impl Into<String>, track: TrackType) -> Self {
        Self {
            descriptor: descriptor.into(),
            track,
            quality: DEFAULT_QUALITY.to_string(),
        }
    }

    /// Set the quality selector.
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }
}

/// Chunks produced by a source, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// An opened source: the size metadata plus the chunk sequence.
pub struct SourceStream {
    pub total: TotalBytes,
    pub chunks: ChunkStream,
}

impl SourceStream {
    pub fn new(total: TotalBytes, chunks: ChunkStream) -> Self {
        Self { total, chunks }
    }
}

impl fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Capability that opens byte streams for a request.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Open the stream described by `request`.
    ///
    /// Failures to reach or read the remote end are reported as
    /// [`MuxError::Transport`] for `request.track`.
    async fn open(&self, request: &SourceRequest) -> Result<SourceStream, MuxError>;
}
