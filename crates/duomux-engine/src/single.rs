//! Single-stream download straight to a file.
//!
//! Uses the same source capability and fetch loop as the mux, without a
//! combiner. Progress is shown with an `indicatif` bar.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::DEFAULT_FORWARD_CHUNK_SIZE;
use crate::error::MuxError;
use crate::fetcher::StreamFetcher;
use crate::progress::{ProgressModel, TotalBytes};
use crate::source::{SourceRequest, StreamSource, TrackType};

const BAR_REFRESH: Duration = Duration::from_millis(200);

/// Outcome of a successful single-stream download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleSummary {
    pub output: PathBuf,
    pub bytes: u64,
    pub total: TotalBytes,
    pub elapsed: Duration,
}

pub struct SingleStreamDownload {
    source: Arc<dyn StreamSource>,
    request: SourceRequest,
    output: PathBuf,
    cancel: CancellationToken,
    show_progress: bool,
    forward_chunk_size: usize,
}

impl SingleStreamDownload {
    pub fn new(
        source: Arc<dyn StreamSource>,
        request: SourceRequest,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            request,
            output: output.into(),
            cancel: CancellationToken::new(),
            show_progress: false,
            forward_chunk_size: DEFAULT_FORWARD_CHUNK_SIZE,
        }
    }

    /// Show a progress bar on stderr while downloading.
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_forward_chunk_size(mut self, size: usize) -> Self {
        self.forward_chunk_size = size.max(1);
        self
    }

    #[instrument(skip_all, fields(track = %self.request.track, output = %self.output.display()))]
    pub async fn run(self) -> Result<SingleSummary, MuxError> {
        let track = self.request.track;
        let (model, writers) = ProgressModel::new();
        let writer = writers.into_source(track);

        let file = tokio::fs::File::create(&self.output)
            .await
            .map_err(|source| MuxError::Output {
                path: self.output.clone(),
                source,
            })?;

        let bar = self.show_progress.then(new_progress_bar);
        let stop = CancellationToken::new();
        let updater = bar.clone().map(|bar| {
            let model = Arc::clone(&model);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(BAR_REFRESH);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => update_bar(&bar, &model, track),
                    }
                }
            })
        });

        let path = self.output.clone();
        let fetcher = StreamFetcher::new(self.source, self.request)
            .with_forward_chunk_size(self.forward_chunk_size);
        let result = fetcher
            .forward(
                BufWriter::new(file),
                writer,
                self.cancel.child_token(),
                move |source| MuxError::Output {
                    path: path.clone(),
                    source,
                },
            )
            .await;

        stop.cancel();
        if let Some(updater) = updater {
            let _ = updater.await;
        }

        if let Some(bar) = &bar {
            update_bar(bar, &model, track);
            match &result {
                Ok(bytes) => bar.finish_with_message(format!("{} downloaded", HumanBytes(*bytes))),
                Err(_) => bar.abandon(),
            }
        }

        let bytes = result?;
        let summary = SingleSummary {
            output: self.output,
            bytes,
            total: model.source(track).total,
            elapsed: model.elapsed(),
        };
        info!(bytes, elapsed = ?summary.elapsed, "Download completed");
        Ok(summary)
    }
}

fn new_progress_bar() -> ProgressBar {
    let bar = ProgressBar::no_length();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar
}

fn update_bar(bar: &ProgressBar, model: &ProgressModel, track: TrackType) {
    let progress = model.source(track);
    if let TotalBytes::Known(total) = progress.total
        && bar.length() != Some(total)
    {
        bar.set_length(total);
    }
    bar.set_position(progress.downloaded);
}
