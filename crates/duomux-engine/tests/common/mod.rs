//! Test doubles shared by the integration tests.
//!
//! - [`PacedSource`] serves a fixed number of bytes at a configurable pace and
//!   can fail partway through.
//! - [`StubCombiner`] stands in for ffmpeg: it counts the bytes received on
//!   each input, echoes `frame=<n>` every ten reads and exits once both inputs
//!   are closed.
//! - [`SharedBuffer`] is a cloneable `Write` sink for capturing the panel.

#![allow(dead_code)]

pub mod http_server;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use duomux_engine::combiner::{Combiner, CombinerChannel, CombinerChannels, CombinerHandle};
use duomux_engine::error::BoxError;
use duomux_engine::{MuxError, SourceRequest, SourceStream, StreamSource, TotalBytes};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Serves `size` bytes in chunks of `chunk` bytes.
#[derive(Debug, Clone)]
pub struct PacedSource {
    size: usize,
    chunk: usize,
    delay: Duration,
    known_total: bool,
    fail_at: Option<usize>,
    pulled: Arc<AtomicU64>,
}

impl PacedSource {
    pub fn new(size: usize, chunk: usize) -> Self {
        Self {
            size,
            chunk,
            delay: Duration::ZERO,
            known_total: true,
            fail_at: None,
            pulled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sleep this long before each chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Do not report a content length.
    pub fn with_unknown_total(mut self) -> Self {
        self.known_total = false;
        self
    }

    /// Yield a transport error instead of chunk number `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Number of chunks pulled so far, the failing one included.
    pub fn pulled(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.pulled)
    }
}

#[async_trait]
impl StreamSource for PacedSource {
    async fn open(&self, request: &SourceRequest) -> Result<SourceStream, MuxError> {
        let total = if self.known_total {
            TotalBytes::Known(self.size as u64)
        } else {
            TotalBytes::Unknown
        };
        let fill = match request.track {
            duomux_engine::TrackType::Audio => b'a',
            duomux_engine::TrackType::Video => b'v',
        };

        let Self {
            size,
            chunk,
            delay,
            fail_at,
            ..
        } = self.clone();
        let pulled = self.pulled();

        let chunks = stream::iter(0..size.div_ceil(chunk))
            .then(move |index| {
                let pulled = Arc::clone(&pulled);
                async move {
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    pulled.fetch_add(1, Ordering::SeqCst);

                    let result: Result<Bytes, BoxError> = if fail_at == Some(index) {
                        Err("connection reset by peer".into())
                    } else {
                        let len = chunk.min(size - index * chunk);
                        Ok(Bytes::from(vec![fill; len]))
                    };
                    result
                }
            })
            .boxed();

        Ok(SourceStream::new(total, chunks))
    }
}

/// Observations made by a [`StubCombiner`].
#[derive(Debug, Clone, Default)]
pub struct StubCounters {
    pub audio_bytes: Arc<AtomicU64>,
    pub video_bytes: Arc<AtomicU64>,
    pub inputs_closed: Arc<AtomicU64>,
    pub terminated: Arc<AtomicBool>,
}

impl StubCounters {
    pub fn audio(&self) -> u64 {
        self.audio_bytes.load(Ordering::SeqCst)
    }

    pub fn video(&self) -> u64 {
        self.video_bytes.load(Ordering::SeqCst)
    }

    /// Inputs that reached end of stream while the stub was running.
    pub fn inputs_closed(&self) -> u64 {
        self.inputs_closed.load(Ordering::SeqCst)
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// In-process combiner built on `tokio::io::duplex`.
#[derive(Debug, Clone)]
pub struct StubCombiner {
    exit_code: i32,
    capacity: usize,
    video_gate: Option<Arc<Notify>>,
    counters: StubCounters,
}

impl Default for StubCombiner {
    fn default() -> Self {
        Self::new()
    }
}

impl StubCombiner {
    pub fn new() -> Self {
        Self {
            exit_code: 0,
            capacity: 64 * 1024,
            video_gate: None,
            counters: StubCounters::default(),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Buffer size of each input channel.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Do not read the video input until `gate` is notified.
    pub fn with_video_gate(mut self, gate: Arc<Notify>) -> Self {
        self.video_gate = Some(gate);
        self
    }

    pub fn counters(&self) -> StubCounters {
        self.counters.clone()
    }
}

#[async_trait]
impl Combiner for StubCombiner {
    async fn start(&self, _output: &Path) -> Result<CombinerHandle, MuxError> {
        let (audio_tx, audio_rx) = tokio::io::duplex(self.capacity);
        let (video_tx, video_rx) = tokio::io::duplex(self.capacity);
        let (progress_tx, progress_rx) = tokio::io::duplex(4096);

        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        let counters = self.counters.clone();
        let work = run_stub(
            audio_rx,
            video_rx,
            progress_tx,
            self.video_gate.clone(),
            counters.clone(),
            self.exit_code,
        );

        let supervisor_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = supervisor_cancel.cancelled() => {
                    counters.terminated.store(true, Ordering::SeqCst);
                    Err(MuxError::Cancelled)
                }
                outcome = work => outcome,
            };
            let _ = exit_tx.send(outcome);
        });

        let channels =
            CombinerChannels::new(Box::new(audio_tx), Box::new(video_tx), Box::new(progress_rx));
        Ok(CombinerHandle::new(channels, exit_rx, cancel))
    }
}

async fn run_stub(
    audio: DuplexStream,
    video: DuplexStream,
    mut progress: DuplexStream,
    video_gate: Option<Arc<Notify>>,
    counters: StubCounters,
    exit_code: i32,
) -> Result<(), MuxError> {
    let (reads_tx, mut reads) = mpsc::unbounded_channel::<()>();
    let mut inputs = JoinSet::new();
    inputs.spawn(count_input(
        audio,
        Arc::clone(&counters.audio_bytes),
        Arc::clone(&counters.inputs_closed),
        reads_tx.clone(),
        None,
        CombinerChannel::AudioInput,
    ));
    inputs.spawn(count_input(
        video,
        Arc::clone(&counters.video_bytes),
        Arc::clone(&counters.inputs_closed),
        reads_tx,
        video_gate,
        CombinerChannel::VideoInput,
    ));

    let mut total_reads = 0u64;
    while reads.recv().await.is_some() {
        total_reads += 1;
        if total_reads % 10 == 0 {
            let burst = format!("frame={total_reads}\nfps=25.0\nspeed=1.00x\nprogress=continue\n");
            progress
                .write_all(burst.as_bytes())
                .await
                .map_err(|e| MuxError::channel(CombinerChannel::ProgressFeed, e))?;
        }
    }

    while let Some(joined) = inputs.join_next().await {
        joined.map_err(|e| MuxError::internal(e.to_string()))??;
    }

    progress
        .write_all(format!("frame={total_reads}\nprogress=end\n").as_bytes())
        .await
        .map_err(|e| MuxError::channel(CombinerChannel::ProgressFeed, e))?;
    drop(progress);

    if exit_code == 0 {
        Ok(())
    } else {
        Err(MuxError::Process {
            code: Some(exit_code),
        })
    }
}

async fn count_input<R>(
    mut input: R,
    received: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
    reads: mpsc::UnboundedSender<()>,
    gate: Option<Arc<Notify>>,
    channel: CombinerChannel,
) -> Result<(), MuxError>
where
    R: AsyncRead + Unpin,
{
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let mut buf = vec![0u8; 8192];
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| MuxError::channel(channel, e))?;
        if n == 0 {
            closed.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        received.fetch_add(n as u64, Ordering::SeqCst);
        let _ = reads.send(());
    }
}

/// A combiner whose channels can never be established.
#[derive(Debug, Clone, Copy)]
pub struct BrokenCombiner;

#[async_trait]
impl Combiner for BrokenCombiner {
    async fn start(&self, _output: &Path) -> Result<CombinerHandle, MuxError> {
        Err(MuxError::setup(
            CombinerChannel::VideoInput,
            io::Error::other("too many open files"),
        ))
    }
}

/// Cloneable in-memory `Write` sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
