//! The dual-stream mux operation.
//!
//! [`DualStreamMux`] starts the combiner, forwards both fetches into its
//! inputs, feeds its progress channel into the model and drives the display.
//! The first failure from any branch cancels every other branch and becomes
//! the operation's only error.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::combiner::{Combiner, CombinerChannel, CombinerCompletion, InputSink};
use crate::config::MuxConfig;
use crate::display::DisplayDriver;
use crate::error::MuxError;
use crate::feed::pump_progress_feed;
use crate::fetcher::StreamFetcher;
use crate::progress::{CombinerProgress, ProgressModel, ProgressWriters, SourceWriter};
use crate::source::{SourceRequest, StreamSource, TrackType};

/// Lifecycle of a mux operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Idle,
    Starting,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl MuxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to download and where to write the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxRequest {
    pub audio: SourceRequest,
    pub video: SourceRequest,
    pub output: PathBuf,
}

impl MuxRequest {
    pub fn new(
        audio_descriptor: impl Into<String>,
        video_descriptor: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            audio: SourceRequest::new(audio_descriptor, TrackType::Audio),
            video: SourceRequest::new(video_descriptor, TrackType::Video),
            output: output.into(),
        }
    }

    /// Quality selectors for the audio and video tracks.
    pub fn with_qualities(mut self, audio: impl Into<String>, video: impl Into<String>) -> Self {
        self.audio.quality = audio.into();
        self.video.quality = video.into();
        self
    }

    fn validate(&self) -> Result<(), MuxError> {
        if self.audio.track != TrackType::Audio || self.video.track != TrackType::Video {
            return Err(MuxError::configuration(
                "audio and video requests must target their own tracks",
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(MuxError::configuration("output path is empty"));
        }
        Ok(())
    }
}

/// Outcome of a successful mux.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxSummary {
    pub output: PathBuf,
    pub audio_bytes: u64,
    pub video_bytes: u64,
    pub combiner: CombinerProgress,
    pub elapsed: Duration,
}

type FetchOutcome = (TrackType, Result<u64, MuxError>);

/// One dual-stream download-and-mux operation.
pub struct DualStreamMux {
    audio_source: Arc<dyn StreamSource>,
    video_source: Arc<dyn StreamSource>,
    combiner: Arc<dyn Combiner>,
    request: MuxRequest,
    config: MuxConfig,
    display: Option<Box<dyn Write + Send>>,
    cancel: CancellationToken,
    model: Arc<ProgressModel>,
    writers: ProgressWriters,
    state: watch::Sender<MuxState>,
}

impl DualStreamMux {
    pub fn new(
        audio_source: Arc<dyn StreamSource>,
        video_source: Arc<dyn StreamSource>,
        combiner: Arc<dyn Combiner>,
        request: MuxRequest,
        config: MuxConfig,
    ) -> Self {
        let (model, writers) = ProgressModel::new();
        let (state, _) = watch::channel(MuxState::Idle);
        Self {
            audio_source,
            video_source,
            combiner,
            request,
            config,
            display: None,
            cancel: CancellationToken::new(),
            model,
            writers,
            state,
        }
    }

    /// Draw the live panel to `out` while streaming.
    pub fn with_display(mut self, out: impl Write + Send + 'static) -> Self {
        self.display = Some(Box::new(out));
        self
    }

    /// Cancelling `token` aborts the operation with [`MuxError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn progress(&self) -> Arc<ProgressModel> {
        Arc::clone(&self.model)
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<MuxState> {
        self.state.subscribe()
    }

    /// Run the operation to completion.
    #[instrument(skip_all, fields(output = %self.request.output.display()))]
    pub async fn run(self) -> Result<MuxSummary, MuxError> {
        let Self {
            audio_source,
            video_source,
            combiner,
            request,
            config,
            display,
            cancel,
            model,
            writers,
            state,
        } = self;

        let result = async {
            request.validate()?;
            let op = cancel.child_token();

            state.send_replace(MuxState::Starting);
            let handle = tokio::select! {
                _ = op.cancelled() => return Err(MuxError::Cancelled),
                handle = combiner.start(&request.output) => handle?,
            };
            let (channels, completion) = handle.into_parts();
            debug!("Combiner channels established");

            state.send_replace(MuxState::Streaming);
            let ProgressWriters {
                audio: audio_writer,
                video: video_writer,
                combiner: combiner_writer,
            } = writers;

            let first_burst = Arc::new(Notify::new());
            let display_stop = CancellationToken::new();
            let display = display.map(|out| {
                let driver = DisplayDriver::new(Arc::clone(&model), config.display_interval, out);
                tokio::spawn(driver.run(Arc::clone(&first_burst), display_stop.clone()))
            });

            // Fetches only stop once the combiner is gone, so it never sees
            // the inputs close on an aborted run.
            let inputs = CancellationToken::new();
            let reader = tokio::spawn(pump_progress_feed(
                channels.progress,
                combiner_writer,
                first_burst,
                op.child_token(),
            ));

            let mut fetches = JoinSet::new();
            for (source, request, sink, writer) in [
                (audio_source, request.audio.clone(), channels.audio, audio_writer),
                (video_source, request.video.clone(), channels.video, video_writer),
            ] {
                let fetcher = StreamFetcher::new(source, request)
                    .with_forward_chunk_size(config.forward_chunk_size);
                spawn_fetch(&mut fetches, fetcher, sink, writer, inputs.child_token());
            }

            let mut run = Supervision {
                op,
                inputs,
                display_stop: display_stop.clone(),
                config: &config,
                state: &state,
                fetches,
                completion,
                reader,
                reader_done: false,
                delivered: Delivered::default(),
            };
            let outcome = run.supervise().await;

            run.freeze_display();
            let outcome = match outcome {
                Ok(()) => {
                    run.drain_progress_feed().await;
                    Ok(run.delivered)
                }
                Err(e) => {
                    run.abort().await;
                    Err(e)
                }
            };

            if let Some(task) = display {
                match task.await {
                    Ok(mut driver) => {
                        if let Err(e) = driver.finish() {
                            warn!("Failed to finish progress display: {}", e);
                        }
                    }
                    Err(e) => warn!("Progress display task failed: {}", e),
                }
            }

            outcome
        }
        .await;

        match result {
            Ok(delivered) => {
                state.send_replace(MuxState::Done);
                let summary = MuxSummary {
                    output: request.output,
                    audio_bytes: delivered.audio,
                    video_bytes: delivered.video,
                    combiner: model.combiner(),
                    elapsed: model.elapsed(),
                };
                info!(
                    audio_bytes = summary.audio_bytes,
                    video_bytes = summary.video_bytes,
                    elapsed = ?summary.elapsed,
                    "Mux completed"
                );
                Ok(summary)
            }
            Err(e) => {
                state.send_replace(MuxState::Failed);
                let branch = e.branch().map(|b| b.as_str()).unwrap_or("operation");
                debug!(branch, "Mux failed: {}", e);
                Err(e)
            }
        }
    }
}

fn spawn_fetch(
    fetches: &mut JoinSet<FetchOutcome>,
    fetcher: StreamFetcher,
    sink: InputSink,
    writer: SourceWriter,
    token: CancellationToken,
) {
    let track = fetcher.track();
    let channel = CombinerChannel::input_for(track);
    fetches.spawn(async move {
        let result = fetcher
            .forward(sink, writer, token, move |e| MuxError::channel(channel, e))
            .await;
        (track, result)
    });
}

fn fetch_outcome(joined: Result<FetchOutcome, JoinError>) -> Result<(TrackType, u64), MuxError> {
    match joined {
        Ok((track, result)) => result.map(|bytes| (track, bytes)),
        Err(e) => Err(MuxError::internal(format!("fetch task failed: {e}"))),
    }
}

fn input_track(error: &MuxError) -> Option<TrackType> {
    match error {
        MuxError::Channel {
            channel: CombinerChannel::AudioInput,
            ..
        } => Some(TrackType::Audio),
        MuxError::Channel {
            channel: CombinerChannel::VideoInput,
            ..
        } => Some(TrackType::Video),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Delivered {
    audio: u64,
    video: u64,
    audio_done: bool,
    video_done: bool,
}

impl Delivered {
    fn record(&mut self, track: TrackType, bytes: u64) {
        match track {
            TrackType::Audio => {
                self.audio = bytes;
                self.audio_done = true;
            }
            TrackType::Video => {
                self.video = bytes;
                self.video_done = true;
            }
        }
    }

    fn remaining(&self) -> usize {
        usize::from(!self.audio_done) + usize::from(!self.video_done)
    }

    fn pending_track(&self) -> Option<TrackType> {
        if !self.audio_done {
            Some(TrackType::Audio)
        } else if !self.video_done {
            Some(TrackType::Video)
        } else {
            None
        }
    }
}

/// The running branches of one operation.
struct Supervision<'a> {
    op: CancellationToken,
    inputs: CancellationToken,
    display_stop: CancellationToken,
    config: &'a MuxConfig,
    state: &'a watch::Sender<MuxState>,
    fetches: JoinSet<FetchOutcome>,
    completion: CombinerCompletion,
    reader: JoinHandle<Result<u64, MuxError>>,
    reader_done: bool,
    delivered: Delivered,
}

impl Supervision<'_> {
    /// Wait until the combiner exits cleanly after both inputs were
    /// delivered, or until the first failure.
    async fn supervise(&mut self) -> Result<(), MuxError> {
        loop {
            tokio::select! {
                _ = self.op.cancelled() => return Err(MuxError::Cancelled),

                Some(joined) = self.fetches.join_next(), if self.delivered.remaining() > 0 => {
                    match fetch_outcome(joined) {
                        Ok((track, bytes)) => self.delivered_input(track, bytes),
                        Err(e) => {
                            self.freeze_display();
                            if e.is_input_channel_failure() {
                                return Err(self.explain_input_failure(e).await);
                            }
                            return Err(e);
                        }
                    }
                }

                exit = self.completion.wait() => {
                    self.freeze_display();
                    exit?;
                    if self.delivered.remaining() == 0 {
                        return Ok(());
                    }
                    return self.await_late_inputs().await;
                }

                joined = &mut self.reader, if !self.reader_done => {
                    self.reader_done = true;
                    match joined {
                        Ok(Ok(bursts)) => debug!(bursts, "Progress feed closed before combiner exit"),
                        Ok(Err(e)) => {
                            self.freeze_display();
                            return Err(e);
                        }
                        Err(e) => {
                            self.freeze_display();
                            return Err(MuxError::internal(format!("progress reader failed: {e}")));
                        }
                    }
                }
            }
        }
    }

    /// Stop redrawing; the panel keeps its last frame.
    fn freeze_display(&self) {
        self.display_stop.cancel();
    }

    fn delivered_input(&mut self, track: TrackType, bytes: u64) {
        debug!(%track, bytes, "Input delivered and closed");
        self.delivered.record(track, bytes);
        if self.delivered.remaining() == 0 {
            self.state.send_replace(MuxState::Draining);
            debug!("Both inputs delivered, waiting for combiner to exit");
        }
    }

    /// A write into a combiner input failed. That usually means the combiner
    /// went away, so its exit status is the more useful error.
    async fn explain_input_failure(&mut self, error: MuxError) -> MuxError {
        match timeout(self.config.exit_grace, self.completion.wait()).await {
            Ok(Err(exit)) => exit,
            Ok(Ok(())) => MuxError::CombinerExitedEarly {
                code: Some(0),
                pending: input_track(&error).unwrap_or(TrackType::Audio),
            },
            Err(_) => error,
        }
    }

    /// The combiner exited cleanly while fetch results were still
    /// outstanding. The fetches may just not have been joined yet.
    async fn await_late_inputs(&mut self) -> Result<(), MuxError> {
        let grace = self.config.exit_grace;
        let late = timeout(grace, async {
            while self.delivered.remaining() > 0 {
                let Some(joined) = self.fetches.join_next().await else {
                    break;
                };
                let (track, bytes) = fetch_outcome(joined)?;
                self.delivered_input(track, bytes);
            }
            Ok::<(), MuxError>(())
        })
        .await;

        let early_exit = |pending| MuxError::CombinerExitedEarly {
            code: Some(0),
            pending,
        };
        match late {
            Ok(Ok(())) => match self.delivered.pending_track() {
                None => Ok(()),
                Some(pending) => Err(early_exit(pending)),
            },
            Ok(Err(e)) => match input_track(&e) {
                Some(pending) => Err(early_exit(pending)),
                None => Err(e),
            },
            Err(_) => Err(early_exit(
                self.delivered.pending_track().unwrap_or(TrackType::Audio),
            )),
        }
    }

    /// Give the progress reader time to apply the final bursts.
    async fn drain_progress_feed(&mut self) {
        if self.reader_done {
            return;
        }
        self.reader_done = true;
        match timeout(self.config.exit_grace, &mut self.reader).await {
            Ok(Ok(Ok(bursts))) => debug!(bursts, "Progress feed drained"),
            Ok(Ok(Err(e))) => warn!("Progress feed failed after combiner exit: {}", e),
            Ok(Err(e)) => warn!("Progress reader failed: {}", e),
            Err(_) => {
                warn!("Progress feed still open after combiner exit");
                self.reader.abort();
            }
        }
    }

    /// Cancel every branch and wait, within bounds, for them to stop.
    ///
    /// The combiner is stopped before the remaining inputs close, so it does
    /// not take them for a normal end of stream. An input whose fetch failed
    /// was already closed by that fetch.
    async fn abort(&mut self) {
        if !self.completion.is_finished() {
            self.completion.terminate();
            match timeout(self.config.exit_grace, self.completion.wait()).await {
                Ok(Ok(())) | Ok(Err(MuxError::Cancelled)) => debug!("Combiner stopped"),
                Ok(Err(e)) => debug!("Combiner stopped: {}", e),
                Err(_) => warn!("Combiner did not stop within {:?}", self.config.exit_grace),
            }
        }

        self.op.cancel();
        self.inputs.cancel();
        self.fetches.abort_all();
        while self.fetches.join_next().await.is_some() {}

        if !self.reader_done {
            self.reader.abort();
        }
    }
}
