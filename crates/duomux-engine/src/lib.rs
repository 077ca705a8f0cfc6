//! # duomux-engine
//!
//! Downloads an audio stream and a video stream concurrently and muxes them
//! into one file through an external combiner (ffmpeg in stream-copy mode),
//! while rendering live progress for both inputs and the combiner.
//!
//! The pieces, leaves first:
//!
//! - [`progress`]: the shared progress model, one writer per slot
//! - [`source`]: the stream source capability and its HTTP implementation
//! - [`fetcher`]: lazy progress-annotated fetches and forwarding into a sink
//! - [`combiner`]: combiner launch and supervision
//! - [`parser`] and [`feed`]: the combiner's `key=value` progress protocol
//! - [`display`]: the in-place terminal panel
//! - [`coordinator`]: the operation state machine
//! - [`single`]: single-stream download without a combiner

pub mod combiner;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod parser;
pub mod progress;
pub mod single;
pub mod source;

pub use combiner::{Combiner, CombinerChannel, CombinerChannels, CombinerHandle};
#[cfg(unix)]
pub use combiner::{FfmpegCombiner, ProcessCombiner};
pub use config::{HttpSourceConfig, MuxConfig};
pub use coordinator::{DualStreamMux, MuxRequest, MuxState, MuxSummary};
pub use error::{Branch, MuxError};
pub use progress::{ProgressModel, ProgressSnapshot, TotalBytes};
pub use single::{SingleStreamDownload, SingleSummary};
pub use source::{HttpSource, SourceRequest, SourceStream, StreamSource, TrackType};
