use std::sync::Arc;
#[cfg(unix)]
use std::time::Duration;

use duomux_engine::{
    HttpSource, HttpSourceConfig, SingleStreamDownload, SourceRequest, StreamSource, TrackType,
};
#[cfg(unix)]
use duomux_engine::{DualStreamMux, FfmpegCombiner, MuxConfig, MuxRequest};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Args, MuxArgs, SingleArgs};
#[cfg(not(unix))]
use crate::error::AppError;
use crate::error::Result;
use crate::output::{print_summary, resolve_output_path};

pub struct CommandExecutor<'a> {
    args: &'a Args,
    cancel: CancellationToken,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(args: &'a Args, cancel: CancellationToken) -> Self {
        Self { args, cancel }
    }

    fn source(&self) -> Result<Arc<dyn StreamSource>> {
        let mut config = HttpSourceConfig::default();
        if let Some(user_agent) = &self.args.user_agent {
            config = config.with_user_agent(user_agent);
        }
        if let Some(proxy) = &self.args.proxy {
            config = config.with_proxy(proxy);
        }
        Ok(Arc::new(HttpSource::new(&config)?))
    }

    #[cfg(unix)]
    pub async fn mux(&self, mux: &MuxArgs) -> Result<()> {
        let output = resolve_output_path(&self.args.outdir, &mux.name, self.args.overwrite)?;

        let mut config = MuxConfig::default()
            .with_combiner_log_level(&mux.ffmpeg_loglevel)
            .with_display_interval(Duration::from_millis(mux.interval_ms));
        if let Some(path) = &mux.ffmpeg_path {
            config = config.with_combiner_path(path);
        }
        info!(combiner = %config.combiner_path.display(), output = %output.display(), "muxing");

        let source = self.source()?;
        let combiner = Arc::new(FfmpegCombiner::new(&config));
        let (audio_quality, video_quality) = mux.qualities();
        let request = MuxRequest::new(&mux.audio_url, &mux.video_url, &output)
            .with_qualities(audio_quality, video_quality);

        let mut job = DualStreamMux::new(Arc::clone(&source), source, combiner, request, config)
            .with_cancellation(self.cancel.clone());
        if !mux.no_progress {
            job = job.with_display(std::io::stdout());
        }

        let summary = job.run().await?;
        print_summary(&summary.output, summary.elapsed);
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn mux(&self, _mux: &MuxArgs) -> Result<()> {
        Err(AppError::Unsupported)
    }

    pub async fn single(&self, single: &SingleArgs) -> Result<()> {
        let output = resolve_output_path(&self.args.outdir, &single.name, self.args.overwrite)?;
        let track = if single.audio {
            TrackType::Audio
        } else {
            TrackType::Video
        };
        let request = SourceRequest::new(&single.url, track).with_quality(&single.quality);

        let summary = SingleStreamDownload::new(self.source()?, request, &output)
            .with_progress_bar(!single.no_progress)
            .with_cancellation(self.cancel.clone())
            .run()
            .await?;

        info!(bytes = summary.bytes, "download finished");
        print_summary(&summary.output, summary.elapsed);
        Ok(())
    }
}
