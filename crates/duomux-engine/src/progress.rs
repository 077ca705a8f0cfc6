//! Shared progress state of one mux operation.
//!
//! The model holds three independently locked slots. Each slot has exactly one
//! writer handle ([`SourceWriter`] or [`CombinerWriter`]), and every write
//! replaces the whole slot, so readers never observe a torn record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::fetcher::FetchProgress;
use crate::parser::CombinerUpdate;
use crate::source::TrackType;

/// Total size of a stream, when the transport reports one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotalBytes {
    #[default]
    Unknown,
    Known(u64),
}

impl TotalBytes {
    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(total) => Some(*total),
            Self::Unknown => None,
        }
    }
}

impl From<Option<u64>> for TotalBytes {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

/// Download progress of one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceProgress {
    pub downloaded: u64,
    pub total: TotalBytes,
}

impl SourceProgress {
    /// Completed fraction in `[0, 1]`.
    ///
    /// `None` while the total is unknown or zero.
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            TotalBytes::Known(total) if total > 0 => {
                Some((self.downloaded as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        self.ratio().map(|ratio| ratio * 100.0)
    }
}

/// Progress reported by the combiner.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinerProgress {
    pub frame: u64,
    pub fps: f64,
    pub speed: String,
}

impl Default for CombinerProgress {
    fn default() -> Self {
        Self {
            frame: 0,
            fps: 0.0,
            speed: "0x".to_string(),
        }
    }
}

impl CombinerProgress {
    /// Apply the fields present in `update`; absent fields keep their value.
    pub fn merge(&mut self, update: &CombinerUpdate) {
        if let Some(frame) = update.frame {
            self.frame = frame;
        }
        if let Some(fps) = update.fps {
            self.fps = fps;
        }
        if let Some(speed) = &update.speed {
            self.speed.clone_from(speed);
        }
    }
}

/// A consistent copy of the whole model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub audio: SourceProgress,
    pub video: SourceProgress,
    pub combiner: CombinerProgress,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn source(&self, track: TrackType) -> SourceProgress {
        match track {
            TrackType::Audio => self.audio,
            TrackType::Video => self.video,
        }
    }
}

#[derive(Debug)]
pub struct ProgressModel {
    started_at: Instant,
    audio: Mutex<SourceProgress>,
    video: Mutex<SourceProgress>,
    combiner: Mutex<CombinerProgress>,
}

/// The writer handles of a fresh model. Handles are not `Clone`.
#[derive(Debug)]
pub struct ProgressWriters {
    pub audio: SourceWriter,
    pub video: SourceWriter,
    pub combiner: CombinerWriter,
}

impl ProgressWriters {
    /// Split off the writer for `track`, dropping the other handles.
    pub fn into_source(self, track: TrackType) -> SourceWriter {
        match track {
            TrackType::Audio => self.audio,
            TrackType::Video => self.video,
        }
    }
}

impl ProgressModel {
    /// Create a model with zeroed slots and its writer handles.
    pub fn new() -> (Arc<Self>, ProgressWriters) {
        let model = Arc::new(Self {
            started_at: Instant::now(),
            audio: Mutex::new(SourceProgress::default()),
            video: Mutex::new(SourceProgress::default()),
            combiner: Mutex::new(CombinerProgress::default()),
        });

        let writers = ProgressWriters {
            audio: SourceWriter {
                model: Arc::clone(&model),
                track: TrackType::Audio,
            },
            video: SourceWriter {
                model: Arc::clone(&model),
                track: TrackType::Video,
            },
            combiner: CombinerWriter {
                model: Arc::clone(&model),
            },
        };

        (model, writers)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn source(&self, track: TrackType) -> SourceProgress {
        *self.slot(track).lock()
    }

    pub fn combiner(&self) -> CombinerProgress {
        self.combiner.lock().clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            audio: self.source(TrackType::Audio),
            video: self.source(TrackType::Video),
            combiner: self.combiner(),
            elapsed: self.elapsed(),
        }
    }

    fn slot(&self, track: TrackType) -> &Mutex<SourceProgress> {
        match track {
            TrackType::Audio => &self.audio,
            TrackType::Video => &self.video,
        }
    }
}

/// Sole writer of one source slot.
#[derive(Debug)]
pub struct SourceWriter {
    model: Arc<ProgressModel>,
    track: TrackType,
}

impl SourceWriter {
    pub fn track(&self) -> TrackType {
        self.track
    }

    /// Replace the slot with the latest fetch event.
    pub fn record(&self, progress: &FetchProgress) {
        if let TotalBytes::Known(total) = progress.total
            && progress.downloaded > total
        {
            warn!(
                track = %self.track,
                downloaded = progress.downloaded,
                total,
                "Source delivered more bytes than announced"
            );
        }

        *self.model.slot(self.track).lock() = SourceProgress {
            downloaded: progress.downloaded,
            total: progress.total,
        };
    }
}

/// Sole writer of the combiner slot.
#[derive(Debug)]
pub struct CombinerWriter {
    model: Arc<ProgressModel>,
}

impl CombinerWriter {
    /// Merge one parsed burst into the combiner slot.
    pub fn apply(&self, update: &CombinerUpdate) {
        if update.is_empty() {
            return;
        }
        let mut slot = self.model.combiner.lock();
        let mut next = slot.clone();
        next.merge(update);
        *slot = next;
    }
}
