//! Live progress panel.
//!
//! The panel is a fixed block of [`PANEL_LINES`] lines redrawn in place. After
//! every draw the cursor is moved back to the first line of the block, so the
//! next draw overwrites it instead of scrolling.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::progress::{ProgressModel, ProgressSnapshot, SourceProgress, TotalBytes};

/// Number of lines in the panel.
pub const PANEL_LINES: usize = 4;

const PERCENT_PLACEHOLDER: &str = "--.--";
const UNKNOWN_SIZE: &str = "?";
const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

/// Format a byte count as megabytes with two decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MEGABYTE)
}

fn source_line(label: &str, progress: &SourceProgress) -> String {
    let percent = progress
        .percent()
        .map_or_else(|| PERCENT_PLACEHOLDER.to_string(), |p| format!("{p:.2}"));
    let total = match progress.total {
        TotalBytes::Known(total) => format_megabytes(total),
        TotalBytes::Unknown => UNKNOWN_SIZE.to_string(),
    };
    format!(
        "{label:<6} | {percent}% processed ({}MB of {total}MB).",
        format_megabytes(progress.downloaded)
    )
}

/// Render the panel lines for `snapshot`.
pub fn render_panel(snapshot: &ProgressSnapshot) -> [String; PANEL_LINES] {
    let combiner = &snapshot.combiner;
    [
        source_line("audio", &snapshot.audio),
        source_line("video", &snapshot.video),
        format!(
            "{:<6} | processing frame {} (at {} fps => {}).",
            "merged", combiner.frame, combiner.fps, combiner.speed
        ),
        format!(
            "running for: {:.2} seconds.",
            snapshot.elapsed.as_secs_f64()
        ),
    ]
}

/// Periodically draws the progress model to a terminal.
///
/// The driver only reads the model.
pub struct DisplayDriver<W> {
    model: Arc<ProgressModel>,
    interval: Duration,
    out: W,
    draws: u64,
}

impl<W: Write> DisplayDriver<W> {
    pub fn new(model: Arc<ProgressModel>, interval: Duration, out: W) -> Self {
        Self {
            model,
            interval,
            out,
            draws: 0,
        }
    }

    /// Number of completed draws.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Draw the panel once and return the cursor to its first line.
    pub fn draw(&mut self) -> io::Result<()> {
        let lines = render_panel(&self.model.snapshot());

        queue!(self.out, MoveToColumn(0))?;
        for (index, line) in lines.iter().enumerate() {
            queue!(self.out, Print(line), Clear(ClearType::UntilNewLine))?;
            if index + 1 < PANEL_LINES {
                queue!(self.out, Print("\n"))?;
            }
        }
        queue!(self.out, MoveUp((PANEL_LINES - 1) as u16), MoveToColumn(0))?;
        self.out.flush()?;

        self.draws += 1;
        Ok(())
    }

    /// Move the cursor below the last drawn panel.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.draws == 0 {
            return Ok(());
        }
        self.out.write_all("\n".repeat(PANEL_LINES).as_bytes())?;
        self.out.flush()
    }

    /// Wait for `started`, then draw every interval until `stop` fires.
    ///
    /// Returns the driver so the caller can run [`finish`](Self::finish)
    /// once the outcome is known.
    pub async fn run(mut self, started: Arc<Notify>, stop: CancellationToken) -> Self {
        tokio::select! {
            _ = stop.cancelled() => return self,
            _ = started.notified() => {}
        }
        debug!(interval = ?self.interval, "Display started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.draw() {
                        warn!("Progress display stopped: {}", e);
                        stop.cancelled().await;
                        break;
                    }
                }
            }
        }

        debug!(draws = self.draws, "Display stopped");
        self
    }
}
