mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{BrokenCombiner, PacedSource, SharedBuffer, StubCombiner};
use duomux_engine::display::render_panel;
use duomux_engine::{
    Branch, DualStreamMux, MuxConfig, MuxError, MuxRequest, MuxState, TotalBytes, TrackType,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const AUDIO_SIZE: usize = 1_048_576;
const VIDEO_SIZE: usize = 2_097_152;

fn request() -> MuxRequest {
    MuxRequest::new("memory://audio", "memory://video", "/tmp/duomux-test.mp4")
}

fn config() -> MuxConfig {
    MuxConfig::default()
        .with_display_interval(Duration::from_millis(10))
        .with_exit_grace(Duration::from_millis(500))
}

#[tokio::test]
async fn muxes_two_independently_paced_streams() {
    let audio = PacedSource::new(AUDIO_SIZE, 16 * 1024).with_delay(Duration::from_millis(1));
    let video = PacedSource::new(VIDEO_SIZE, 32 * 1024).with_delay(Duration::from_millis(2));
    let combiner = StubCombiner::new();
    let counters = combiner.counters();
    let panel = SharedBuffer::default();

    let mux = DualStreamMux::new(
        Arc::new(audio),
        Arc::new(video),
        Arc::new(combiner),
        request(),
        config(),
    )
    .with_display(panel.clone());
    let model = mux.progress();
    let state = mux.state();

    let summary = mux.run().await.unwrap();

    assert_eq!(summary.audio_bytes, AUDIO_SIZE as u64);
    assert_eq!(summary.video_bytes, VIDEO_SIZE as u64);
    assert_eq!(counters.audio(), AUDIO_SIZE as u64);
    assert_eq!(counters.video(), VIDEO_SIZE as u64);
    assert!(!counters.was_terminated());

    let snapshot = model.snapshot();
    assert_eq!(snapshot.audio.downloaded, 1_048_576);
    assert_eq!(snapshot.video.downloaded, 2_097_152);
    assert_eq!(snapshot.audio.total, TotalBytes::Known(1_048_576));
    assert_eq!(snapshot.video.total, TotalBytes::Known(2_097_152));
    assert!(snapshot.combiner.frame > 0);
    assert_eq!(snapshot.combiner.speed, "1.00x");
    assert_eq!(summary.combiner, snapshot.combiner);

    assert_eq!(*state.borrow(), MuxState::Done);

    let drawn = panel.contents();
    assert!(drawn.contains("audio  |"));
    assert!(drawn.contains("merged | processing frame"));
    assert!(drawn.ends_with("\n\n\n\n"));
}

#[tokio::test]
async fn transport_error_cancels_the_other_branches() {
    let audio = PacedSource::new(8 * 1_048_576, 16 * 1024).with_delay(Duration::from_millis(2));
    let audio_pulled = audio.pulled();
    let video = PacedSource::new(VIDEO_SIZE, 32 * 1024)
        .with_delay(Duration::from_millis(2))
        .failing_at(3);
    let combiner = StubCombiner::new();
    let counters = combiner.counters();

    let mux = DualStreamMux::new(
        Arc::new(audio),
        Arc::new(video),
        Arc::new(combiner),
        request(),
        config(),
    );
    let state = mux.state();

    let err = mux.run().await.unwrap_err();
    assert!(matches!(
        err,
        MuxError::Transport {
            track: TrackType::Video,
            ..
        }
    ));
    assert_eq!(err.branch(), Some(Branch::Video));
    assert_eq!(*state.borrow(), MuxState::Failed);
    assert!(counters.was_terminated());
    // Only the failed video fetch closed its own input.
    assert!(counters.inputs_closed() <= 1);

    let pulled = audio_pulled.load(Ordering::SeqCst);
    let received = counters.audio();
    assert!(received < 8 * 1_048_576);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(audio_pulled.load(Ordering::SeqCst), pulled);
    assert_eq!(counters.audio(), received);
}

#[tokio::test]
async fn nonzero_combiner_exit_fails_the_operation() {
    let combiner = StubCombiner::new().with_exit_code(1);
    let counters = combiner.counters();

    let err = DualStreamMux::new(
        Arc::new(PacedSource::new(64 * 1024, 8 * 1024)),
        Arc::new(PacedSource::new(128 * 1024, 8 * 1024)),
        Arc::new(combiner),
        request(),
        config(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, MuxError::Process { code: Some(1) }));
    assert_eq!(err.branch(), Some(Branch::Combiner));
    assert_eq!(counters.audio(), 64 * 1024);
    assert_eq!(counters.video(), 128 * 1024);
}

#[tokio::test]
async fn failure_is_left_to_the_caller_to_report() {
    let logs = SharedBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let err = DualStreamMux::new(
        Arc::new(PacedSource::new(16 * 1024, 4 * 1024)),
        Arc::new(PacedSource::new(16 * 1024, 4 * 1024)),
        Arc::new(StubCombiner::new().with_exit_code(2)),
        request(),
        config(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, MuxError::Process { code: Some(2) }));
    let logs = logs.contents();
    assert!(logs.contains("Mux failed"));
    assert!(!logs.contains("ERROR"), "failure logged at error level:\n{logs}");
}

#[tokio::test]
async fn unknown_totals_render_placeholders() {
    let mux = DualStreamMux::new(
        Arc::new(PacedSource::new(100_000, 10_000).with_unknown_total()),
        Arc::new(PacedSource::new(300_000, 10_000).with_unknown_total()),
        Arc::new(StubCombiner::new()),
        request(),
        config(),
    );
    let model = mux.progress();

    let summary = mux.run().await.unwrap();
    assert_eq!(summary.audio_bytes, 100_000);
    assert_eq!(summary.video_bytes, 300_000);

    let snapshot = model.snapshot();
    assert_eq!(snapshot.audio.total, TotalBytes::Unknown);
    assert_eq!(snapshot.audio.ratio(), None);

    let lines = render_panel(&snapshot);
    assert!(lines[0].starts_with("audio  | --.--% processed"));
    assert!(lines[1].starts_with("video  | --.--% processed"));
}

#[tokio::test]
async fn slow_input_throttles_its_fetch() {
    const CAPACITY: usize = 64 * 1024;
    const CHUNK: usize = 64 * 1024;
    const LARGE: usize = 8 * 1_048_576;

    let gate = Arc::new(Notify::new());
    let combiner = StubCombiner::new()
        .with_capacity(CAPACITY)
        .with_video_gate(Arc::clone(&gate));
    let counters = combiner.counters();

    let mux = DualStreamMux::new(
        Arc::new(PacedSource::new(256 * 1024, 16 * 1024)),
        Arc::new(PacedSource::new(LARGE, CHUNK)),
        Arc::new(combiner),
        request(),
        config(),
    );
    let model = mux.progress();
    let mut state = mux.state();
    let task = tokio::spawn(mux.run());

    // Audio is read freely and completes while video is held.
    tokio::time::timeout(Duration::from_secs(5), async {
        while model.source(TrackType::Audio).downloaded < 256 * 1024 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("audio fetch was blocked by the held video input");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let video = model.source(TrackType::Video).downloaded;
    assert!(
        video <= (CAPACITY + 2 * CHUNK) as u64,
        "video fetch ran ahead of its input: {video} bytes"
    );
    assert_eq!(counters.video(), 0);
    assert_eq!(*state.borrow_and_update(), MuxState::Streaming);

    gate.notify_one();
    let summary = tokio::time::timeout(Duration::from_secs(30), task)
        .await
        .expect("mux did not finish after releasing the video input")
        .unwrap()
        .unwrap();
    assert_eq!(summary.video_bytes, LARGE as u64);
    assert_eq!(counters.video(), LARGE as u64);
}

#[tokio::test]
async fn external_cancellation_stops_everything() {
    let combiner = StubCombiner::new();
    let counters = combiner.counters();
    let token = CancellationToken::new();

    let mux = DualStreamMux::new(
        Arc::new(PacedSource::new(8 * 1_048_576, 16 * 1024).with_delay(Duration::from_millis(5))),
        Arc::new(PacedSource::new(8 * 1_048_576, 16 * 1024).with_delay(Duration::from_millis(5))),
        Arc::new(combiner),
        request(),
        config(),
    )
    .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = mux.run().await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, MuxError::Cancelled));
    assert_eq!(err.branch(), None);
    assert!(counters.was_terminated());
    // The combiner is stopped while both inputs are still open.
    assert_eq!(counters.inputs_closed(), 0);
}

#[tokio::test]
async fn setup_failure_never_starts_streaming() {
    let audio = PacedSource::new(1024, 256);
    let audio_pulled = audio.pulled();
    let video = PacedSource::new(1024, 256);
    let video_pulled = video.pulled();

    let mux = DualStreamMux::new(
        Arc::new(audio),
        Arc::new(video),
        Arc::new(BrokenCombiner),
        request(),
        config(),
    );
    let state = mux.state();

    let err = mux.run().await.unwrap_err();
    assert!(matches!(err, MuxError::Setup { .. }));
    assert_eq!(*state.borrow(), MuxState::Failed);
    assert_eq!(audio_pulled.load(Ordering::SeqCst), 0);
    assert_eq!(video_pulled.load(Ordering::SeqCst), 0);
}
