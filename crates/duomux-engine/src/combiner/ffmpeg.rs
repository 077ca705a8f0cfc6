use std::path::Path;

use async_trait::async_trait;
use tracing::instrument;

use super::process::{ChannelLayout, OUTPUT_PLACEHOLDER, ProcessCombiner};
use super::{Combiner, CombinerHandle};
use crate::config::MuxConfig;
use crate::error::MuxError;

/// ffmpeg in stream-copy mode: audio from the first input, video from the
/// second, progress on its own pipe.
#[derive(Debug, Clone)]
pub struct FfmpegCombiner {
    process: ProcessCombiner,
}

impl FfmpegCombiner {
    pub fn new(config: &MuxConfig) -> Self {
        let layout = ChannelLayout::default();
        let args = build_args(config, layout);
        Self {
            process: ProcessCombiner::new(config.combiner_path.clone(), args).with_layout(layout),
        }
    }

    /// Arguments passed to ffmpeg for `output`.
    pub fn args_for(&self, output: &Path) -> Vec<std::ffi::OsString> {
        self.process.args_for(output)
    }
}

fn pipe_url(fd: i32) -> String {
    format!("pipe:{fd}")
}

fn build_args(config: &MuxConfig, layout: ChannelLayout) -> Vec<String> {
    let mut args = vec![
        "-loglevel".to_string(),
        config.combiner_log_level.clone(),
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-progress".to_string(),
        pipe_url(layout.progress),
        "-i".to_string(),
        pipe_url(layout.audio),
        "-i".to_string(),
        pipe_url(layout.video),
        "-map".to_string(),
        "0:a".to_string(),
        "-map".to_string(),
        "1:v".to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ];
    args.extend(config.extra_output_args.iter().cloned());
    args.push(OUTPUT_PLACEHOLDER.to_string());
    // The caller decides whether an existing file may be replaced.
    args.push("-y".to_string());
    args
}

#[async_trait]
impl Combiner for FfmpegCombiner {
    #[instrument(skip(self), fields(output = %output.display()))]
    async fn start(&self, output: &Path) -> Result<CombinerHandle, MuxError> {
        self.process.start(output).await
    }
}
