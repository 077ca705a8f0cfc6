use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download separate audio and video streams and mux them with ffmpeg", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory the output file is written to (created if missing)
    #[arg(short = 'd', long, default_value = ".", global = true)]
    pub outdir: PathBuf,

    /// Overwrite an existing output file instead of prefixing a timestamp
    #[arg(short = 'y', long, global = true)]
    pub overwrite: bool,

    /// Proxy URL for every HTTP request
    #[arg(long, env = "DUOMUX_PROXY", global = true)]
    pub proxy: Option<String>,

    /// User agent sent with every HTTP request
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download an audio and a video stream and combine them into one file
    Mux(MuxArgs),

    /// Download a single stream straight to a file
    Single(SingleArgs),
}

#[derive(ClapArgs, Debug)]
pub struct MuxArgs {
    /// URL of the audio stream
    pub audio_url: String,

    /// URL of the video stream
    pub video_url: String,

    /// Output file name
    #[arg(short, long, default_value = "output.mp4")]
    pub name: String,

    /// Quality selector for the audio stream
    #[arg(long, default_value = "highest")]
    pub audio_quality: String,

    /// Quality selector for the video stream
    #[arg(long, default_value = "highest")]
    pub video_quality: String,

    /// Quick sample: highest audio quality, lowest video quality
    #[arg(long, conflicts_with_all = ["audio_quality", "video_quality"])]
    pub sample: bool,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH")]
    pub ffmpeg_path: Option<PathBuf>,

    /// ffmpeg log level
    #[arg(long, default_value = "error")]
    pub ffmpeg_loglevel: String,

    /// Live panel refresh interval in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(50..))]
    pub interval_ms: u64,

    /// Do not draw the live progress panel
    #[arg(long)]
    pub no_progress: bool,
}

impl MuxArgs {
    /// Audio and video quality selectors, with `--sample` applied.
    pub fn qualities(&self) -> (&str, &str) {
        if self.sample {
            ("highest", "lowest")
        } else {
            (self.audio_quality.as_str(), self.video_quality.as_str())
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct SingleArgs {
    /// URL of the stream
    pub url: String,

    /// Output file name
    #[arg(short, long, default_value = "output.bin")]
    pub name: String,

    /// Quality selector for the stream
    #[arg(long, default_value = "highest")]
    pub quality: String,

    /// Treat the stream as the audio track (affects logs only)
    #[arg(long)]
    pub audio: bool,

    /// Do not show a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_mux_with_global_flags() {
        let args = Args::try_parse_from([
            "duomux",
            "mux",
            "https://cdn/a.m4a",
            "https://cdn/v.mp4",
            "-n",
            "clip.mp4",
            "-y",
            "--outdir",
            "/tmp/out",
            "--ffmpeg-path",
            "/opt/ffmpeg",
        ])
        .unwrap();

        assert!(args.overwrite);
        assert_eq!(args.outdir, PathBuf::from("/tmp/out"));
        let Commands::Mux(mux) = args.command else {
            panic!("expected mux");
        };
        assert_eq!(mux.audio_url, "https://cdn/a.m4a");
        assert_eq!(mux.name, "clip.mp4");
        assert_eq!(mux.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(mux.interval_ms, 1000);
        assert_eq!(mux.qualities(), ("highest", "highest"));
    }

    fn mux_args(extra: &[&str]) -> MuxArgs {
        let mut argv = vec!["duomux", "mux", "https://cdn/a.m4a", "https://cdn/v.mp4"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).unwrap().command {
            Commands::Mux(mux) => mux,
            other => panic!("expected mux, got {other:?}"),
        }
    }

    #[test]
    fn track_qualities_are_independent() {
        let mux = mux_args(&["--audio-quality", "medium", "--video-quality", "1080p"]);
        assert_eq!(mux.qualities(), ("medium", "1080p"));

        let mux = mux_args(&["--video-quality", "lowest"]);
        assert_eq!(mux.qualities(), ("highest", "lowest"));
    }

    #[test]
    fn sample_preset_picks_lowest_video() {
        let mux = mux_args(&["--sample"]);
        assert_eq!(mux.qualities(), ("highest", "lowest"));

        let conflicting = Args::try_parse_from([
            "duomux",
            "mux",
            "https://cdn/a.m4a",
            "https://cdn/v.mp4",
            "--sample",
            "--video-quality",
            "720p",
        ]);
        assert!(conflicting.is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        let result = Args::try_parse_from(["duomux", "-v", "-q", "single", "https://cdn/a"]);
        assert!(result.is_err());
    }
}
