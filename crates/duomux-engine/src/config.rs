use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Environment variable overriding the combiner binary.
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

/// Default combiner log level. Only errors reach the terminal so the live
/// panel is not scrolled away.
pub const DEFAULT_COMBINER_LOG_LEVEL: &str = "error";

/// Default size of a single write into a combiner input.
pub const DEFAULT_FORWARD_CHUNK_SIZE: usize = 64 * 1024;

/// Options of a mux operation.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Path of the combiner binary.
    pub combiner_path: PathBuf,

    /// Value passed to the combiner's `-loglevel`.
    pub combiner_log_level: String,

    /// Extra arguments inserted before the output path.
    pub extra_output_args: Vec<String>,

    /// Period of the display driver.
    pub display_interval: Duration,

    /// Largest slice written into a combiner input at once. Bounds how far a
    /// fetch can get ahead of the combiner between two writability checks.
    pub forward_chunk_size: usize,

    /// How long the combiner gets to exit once its inputs are closed or a
    /// sibling branch failed, before it is reported as lost or killed.
    pub exit_grace: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            combiner_path: std::env::var_os(FFMPEG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            combiner_log_level: DEFAULT_COMBINER_LOG_LEVEL.to_string(),
            extra_output_args: Vec::new(),
            display_interval: Duration::from_secs(1),
            forward_chunk_size: DEFAULT_FORWARD_CHUNK_SIZE,
            exit_grace: Duration::from_secs(2),
        }
    }
}

impl MuxConfig {
    pub fn with_combiner_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.combiner_path = path.into();
        self
    }

    pub fn with_combiner_log_level(mut self, level: impl Into<String>) -> Self {
        self.combiner_log_level = level.into();
        self
    }

    pub fn with_extra_output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_output_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_display_interval(mut self, interval: Duration) -> Self {
        self.display_interval = interval;
        self
    }

    pub fn with_forward_chunk_size(mut self, size: usize) -> Self {
        self.forward_chunk_size = size.max(1);
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}

/// Options of the HTTP stream source.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// User agent string
    pub user_agent: String,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy URL (optional), e.g. `http://127.0.0.1:8080` or `socks5://...`
    pub proxy: Option<String>,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            headers: HttpSourceConfig::get_default_headers(),
            proxy: None,
        }
    }
}

impl HttpSourceConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}
