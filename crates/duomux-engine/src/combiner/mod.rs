//! Combiner process management.
//!
//! A combiner merges the audio and video inputs into one output file. The
//! engine talks to it through three named channels: two input sinks the
//! fetchers write into and one progress feed the parser reads from.

#[cfg(unix)]
mod ffmpeg;
#[cfg(unix)]
mod process;

#[cfg(unix)]
pub use ffmpeg::FfmpegCombiner;
#[cfg(unix)]
pub use process::{ChannelLayout, OUTPUT_PLACEHOLDER, ProcessCombiner};

use std::fmt;
use std::future;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::MuxError;
use crate::source::TrackType;

/// One of the auxiliary channels attached to a combiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombinerChannel {
    AudioInput,
    VideoInput,
    ProgressFeed,
}

impl CombinerChannel {
    /// Input channel a track is routed to.
    pub fn input_for(track: TrackType) -> Self {
        match track {
            TrackType::Audio => Self::AudioInput,
            TrackType::Video => Self::VideoInput,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioInput => "audio input",
            Self::VideoInput => "video input",
            Self::ProgressFeed => "progress feed",
        }
    }
}

impl fmt::Display for CombinerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writable input of a combiner.
pub type InputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable progress feed of a combiner.
pub type ProgressFeed = Box<dyn AsyncRead + Send + Unpin>;

/// The auxiliary channels of a running combiner.
pub struct CombinerChannels {
    pub audio: InputSink,
    pub video: InputSink,
    pub progress: ProgressFeed,
}

impl CombinerChannels {
    pub fn new(audio: InputSink, video: InputSink, progress: ProgressFeed) -> Self {
        Self {
            audio,
            video,
            progress,
        }
    }
}

/// A started combiner: its channels plus the completion signal.
pub struct CombinerHandle {
    channels: CombinerChannels,
    completion: CombinerCompletion,
}

impl CombinerHandle {
    /// `exit` fires once with the combiner's outcome. Cancelling `cancel`
    /// asks the supervisor to terminate the combiner. Dropping the handle or
    /// its completion cancels it too.
    pub fn new(
        channels: CombinerChannels,
        exit: oneshot::Receiver<Result<(), MuxError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channels,
            completion: CombinerCompletion {
                exit: Some(exit),
                _terminate_on_drop: cancel.clone().drop_guard(),
                cancel,
            },
        }
    }

    pub fn into_parts(self) -> (CombinerChannels, CombinerCompletion) {
        (self.channels, self.completion)
    }
}

impl fmt::Debug for CombinerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinerHandle")
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

/// The combiner's one-shot completion signal.
#[derive(Debug)]
pub struct CombinerCompletion {
    exit: Option<oneshot::Receiver<Result<(), MuxError>>>,
    cancel: CancellationToken,
    _terminate_on_drop: DropGuard,
}

impl CombinerCompletion {
    /// Wait for the combiner to exit.
    ///
    /// Resolves exactly once. Later calls never resolve, so the future can
    /// sit in a `select!` loop after the outcome has been taken.
    pub async fn wait(&mut self) -> Result<(), MuxError> {
        let Some(exit) = self.exit.as_mut() else {
            return future::pending().await;
        };
        let outcome = exit.await.unwrap_or(Err(MuxError::CombinerLost));
        self.exit = None;
        outcome
    }

    /// Whether the outcome has already been taken.
    pub fn is_finished(&self) -> bool {
        self.exit.is_none()
    }

    /// Ask the supervisor to terminate the combiner.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

/// Launches combiners.
///
/// Input routing is fixed: the audio input carries the audio track and the
/// video input carries the video track.
#[async_trait]
pub trait Combiner: Send + Sync {
    /// Start a combiner writing to `output`.
    ///
    /// All three channels are established before this returns. If any of
    /// them fails, no combiner is left running.
    async fn start(&self, output: &Path) -> Result<CombinerHandle, MuxError>;
}
