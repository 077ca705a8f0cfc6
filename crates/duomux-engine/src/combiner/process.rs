//! Combiners running as a child process.
//!
//! The child inherits the standard streams. The three auxiliary channels are
//! extra pipes mapped onto fixed descriptors before exec.

use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use process_utils::ExtraPipes;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Combiner, CombinerChannel, CombinerChannels, CombinerHandle};
use crate::error::MuxError;

/// Placeholder replaced by the output path in argument templates.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Descriptor numbers of the auxiliary channels inside the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub progress: RawFd,
    pub audio: RawFd,
    pub video: RawFd,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            progress: 3,
            audio: 4,
            video: 5,
        }
    }
}

/// Launches a program with the channel layout attached.
#[derive(Debug, Clone)]
pub struct ProcessCombiner {
    program: PathBuf,
    args: Vec<String>,
    layout: ChannelLayout,
}

impl ProcessCombiner {
    /// `args` may contain [`OUTPUT_PLACEHOLDER`], substituted on start.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            layout: ChannelLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Arguments with the output path substituted.
    pub fn args_for(&self, output: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == OUTPUT_PLACEHOLDER {
                    output.as_os_str().to_owned()
                } else {
                    OsString::from(arg)
                }
            })
            .collect()
    }
}

#[async_trait]
impl Combiner for ProcessCombiner {
    async fn start(&self, output: &Path) -> Result<CombinerHandle, MuxError> {
        let mut pipes = ExtraPipes::new();
        let progress = pipes
            .child_writes(self.layout.progress)
            .map_err(|e| MuxError::setup(CombinerChannel::ProgressFeed, e))?;
        let audio = pipes
            .child_reads(self.layout.audio)
            .map_err(|e| MuxError::setup(CombinerChannel::AudioInput, e))?;
        let video = pipes
            .child_reads(self.layout.video)
            .map_err(|e| MuxError::setup(CombinerChannel::VideoInput, e))?;

        let args = self.args_for(output);
        debug!(program = %self.program.display(), ?args, "Starting combiner");

        let mut command = process_utils::tokio_command(&self.program);
        command
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child_ends = pipes.attach(&mut command);
        let child = command.spawn().map_err(|source| MuxError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        child_ends.close();

        info!(
            pid = child.id(),
            output = %output.display(),
            "Combiner started"
        );

        let cancel = CancellationToken::new();
        let exit = spawn_supervisor(child, cancel.clone());
        let channels = CombinerChannels::new(Box::new(audio), Box::new(video), Box::new(progress));

        Ok(CombinerHandle::new(channels, exit, cancel))
    }
}

/// Wait for the child in the background and report its outcome once.
///
/// Cancelling `cancel` kills the child and reports [`MuxError::Cancelled`].
fn spawn_supervisor(
    mut child: Child,
    cancel: CancellationToken,
) -> oneshot::Receiver<Result<(), MuxError>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill combiner: {}", e);
                }
                debug!("Combiner terminated");
                Err(MuxError::Cancelled)
            }
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => {
                        debug!("Combiner exited cleanly");
                        Ok(())
                    }
                    Ok(status) => {
                        warn!("Combiner exited with {}", status);
                        Err(MuxError::Process { code: status.code() })
                    }
                    Err(e) => {
                        error!("Error waiting for combiner: {}", e);
                        Err(MuxError::Supervise { source: e })
                    }
                }
            }
        };
        let _ = tx.send(outcome);
    });

    rx
}
