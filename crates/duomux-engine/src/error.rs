use std::fmt;
use std::path::PathBuf;

use crate::combiner::CombinerChannel;
use crate::source::TrackType;

/// Boxed error carried by stream sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The branch of a mux operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Audio,
    Video,
    Combiner,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Combiner => "combiner",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TrackType> for Branch {
    fn from(track: TrackType) -> Self {
        match track {
            TrackType::Audio => Self::Audio,
            TrackType::Video => Self::Video,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to set up combiner {channel} channel: {source}")]
    Setup {
        channel: CombinerChannel,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn combiner `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("combiner exited unsuccessfully ({})", describe_exit(.code))]
    Process { code: Option<i32> },

    #[error("combiner exited ({}) before the {pending} input was fully delivered", describe_exit(.code))]
    CombinerExitedEarly {
        code: Option<i32>,
        pending: TrackType,
    },

    #[error("combiner supervisor stopped without reporting an exit status")]
    CombinerLost,

    #[error("failed to wait for combiner: {source}")]
    Supervise {
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on combiner {channel} channel: {source}")]
    Channel {
        channel: CombinerChannel,
        #[source]
        source: std::io::Error,
    },

    #[error("{track} stream transport error: {source}")]
    Transport {
        track: TrackType,
        #[source]
        source: BoxError,
    },

    #[error("invalid {track} source `{descriptor}`: {reason}")]
    InvalidSource {
        track: TrackType,
        descriptor: String,
        reason: String,
    },

    #[error("failed to write output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl MuxError {
    pub fn setup(channel: CombinerChannel, source: std::io::Error) -> Self {
        Self::Setup { channel, source }
    }

    pub fn channel(channel: CombinerChannel, source: std::io::Error) -> Self {
        Self::Channel { channel, source }
    }

    pub fn transport(track: TrackType, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            track,
            source: source.into(),
        }
    }

    pub fn invalid_source(
        track: TrackType,
        descriptor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSource {
            track,
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Which branch of the operation failed, when it can be attributed.
    pub fn branch(&self) -> Option<Branch> {
        match self {
            Self::Transport { track, .. } | Self::InvalidSource { track, .. } => {
                Some((*track).into())
            }
            Self::Setup { .. }
            | Self::Spawn { .. }
            | Self::Process { .. }
            | Self::CombinerExitedEarly { .. }
            | Self::CombinerLost
            | Self::Supervise { .. }
            | Self::Channel { .. } => Some(Branch::Combiner),
            Self::Output { .. }
            | Self::Configuration { .. }
            | Self::Cancelled
            | Self::Internal { .. } => None,
        }
    }

    /// Whether this error is a write failure on one of the combiner inputs.
    ///
    /// Such failures are usually a symptom of the combiner dying, so the
    /// coordinator prefers the combiner's own exit error when one follows.
    pub fn is_input_channel_failure(&self) -> bool {
        matches!(
            self,
            Self::Channel {
                channel: CombinerChannel::AudioInput | CombinerChannel::VideoInput,
                ..
            }
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
