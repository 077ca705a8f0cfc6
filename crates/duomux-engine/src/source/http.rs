use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Proxy};
use tracing::{debug, info, instrument};
use url::Url;

use super::{SourceRequest, SourceStream, StreamSource};
use crate::config::HttpSourceConfig;
use crate::error::{BoxError, MuxError};
use crate::progress::TotalBytes;

/// Stream source fetching already-resolved URLs over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &HttpSourceConfig) -> Result<Self, MuxError> {
        let mut client_builder = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(config.headers.clone())
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            });

        if !config.connect_timeout.is_zero() {
            client_builder = client_builder.connect_timeout(config.connect_timeout);
        }

        if !config.read_timeout.is_zero() {
            client_builder = client_builder.read_timeout(config.read_timeout);
        }

        if let Some(proxy_url) = &config.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                MuxError::configuration(format!("invalid proxy URL `{proxy_url}`: {e}"))
            })?;
            client_builder = client_builder.proxy(proxy);
            info!(proxy_url = %proxy_url, "Using explicitly configured proxy for downloads");
        }

        let client = client_builder
            .build()
            .map_err(|e| MuxError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl StreamSource for HttpSource {
    #[instrument(skip(self, request), fields(track = %request.track, url = %request.descriptor))]
    async fn open(&self, request: &SourceRequest) -> Result<SourceStream, MuxError> {
        let track = request.track;
        let url = Url::parse(&request.descriptor)
            .map_err(|e| MuxError::invalid_source(track, &request.descriptor, e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MuxError::invalid_source(
                track,
                &request.descriptor,
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }

        debug!(quality = %request.quality, "Opening HTTP stream");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MuxError::transport(track, e))?
            .error_for_status()
            .map_err(|e| MuxError::transport(track, e))?;

        let total = TotalBytes::from(response.content_length());
        debug!(status = %response.status(), ?total, "HTTP stream opened");

        let chunks = response
            .bytes_stream()
            .map_err(|e| -> BoxError { Box::new(e) })
            .boxed();

        Ok(SourceStream::new(total, chunks))
    }
}
