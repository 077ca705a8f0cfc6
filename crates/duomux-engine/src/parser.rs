//! Parser for the combiner's `key=value` progress protocol.
//!
//! ffmpeg's `-progress` feed arrives in bursts such as:
//!
//! ```text
//! frame=120
//! fps=24.98
//! speed=1.01x
//! progress=continue
//! ```
//!
//! Every burst folds into one [`CombinerUpdate`]. Keys absent from a burst stay
//! `None` so the progress model keeps their previous values.

use tracing::trace;

/// Value of the `progress` key that closes each burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Continue,
    End,
}

/// Fields recognized in one burst.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinerUpdate {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<String>,
    pub state: Option<FeedState>,
}

impl CombinerUpdate {
    /// True when the burst carried no display field.
    pub fn is_empty(&self) -> bool {
        self.frame.is_none() && self.fps.is_none() && self.speed.is_none()
    }
}

/// Split one line into its key and value.
///
/// Only the first `=` separates; the value may contain more. Lines without
/// `=` or with an empty key yield `None`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.trim().split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Fold every line of a burst into one update. Last value wins per key.
pub fn parse_chunk(raw: &str) -> CombinerUpdate {
    let mut update = CombinerUpdate::default();

    for line in raw.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = parse_line(line) else {
            trace!(line, "Skipping malformed progress line");
            continue;
        };

        match key {
            "frame" => match value.parse() {
                Ok(frame) => update.frame = Some(frame),
                Err(_) => trace!(value, "Ignoring non-integer frame"),
            },
            "fps" => match value.parse::<f64>() {
                Ok(fps) if fps.is_finite() && fps >= 0.0 => update.fps = Some(fps),
                _ => trace!(value, "Ignoring invalid fps"),
            },
            "speed" => {
                if !value.is_empty() {
                    update.speed = Some(value.to_string());
                }
            }
            "progress" => match value {
                "continue" => update.state = Some(FeedState::Continue),
                "end" => update.state = Some(FeedState::End),
                _ => trace!(value, "Unknown progress state"),
            },
            _ => {}
        }
    }

    update
}
