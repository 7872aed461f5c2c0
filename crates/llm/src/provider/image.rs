//! Turning image references into inline base64 for providers that require it.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use config::ImageFetchConfig;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};

use crate::{error::LlmError, messages::unified::UnifiedImageSource};

/// Raw image bytes with their media type.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Downloads remote images so they can be inlined.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedImage>;
}

/// Fetches images over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &ImageFetchConfig) -> crate::Result<Self> {
        let client = default_http_client_builder(config.timeout).build().map_err(|e| {
            log::error!("Failed to create HTTP client for image fetching: {e}");
            LlmError::Transport(e.to_string())
        })?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

fn default_http_client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedImage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request image {url}"))?
            .error_for_status()?;

        if let Some(length) = response.content_length()
            && length > self.max_bytes as u64
        {
            bail!("image {url} is {length} bytes, limit is {}", self.max_bytes);
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| value.starts_with("image/"))
            .or_else(|| media_type_from_extension(url).map(str::to_string))
            .with_context(|| format!("could not determine the media type of image {url}"))?;

        let mut data = Vec::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;

            if data.len() + chunk.len() > self.max_bytes {
                bail!("image {url} exceeds the {} byte limit", self.max_bytes);
            }

            data.extend_from_slice(&chunk);
        }

        Ok(FetchedImage { media_type, data })
    }
}

/// An [`ImageFetcher`] for hosts that never download remote images.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledImageFetcher;

#[async_trait]
impl ImageFetcher for DisabledImageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedImage> {
        bail!("remote image fetching is disabled, cannot load {url}")
    }
}

/// Resolves an image source into `(media_type, base64 data)`.
///
/// `data:` URLs are decoded locally, remote URLs go through the fetcher. A failure is
/// logged and yields `None` so the caller drops the part and the turn still goes out.
pub(crate) async fn inline_image(source: &UnifiedImageSource, fetcher: &dyn ImageFetcher) -> Option<(String, String)> {
    match source {
        UnifiedImageSource::Inline { media_type, data } => Some((media_type.clone(), data.clone())),
        UnifiedImageSource::Url { url } if url.starts_with("data:") => match parse_data_url(url) {
            Some(image) => Some(image),
            None => {
                log::warn!("Dropping image part: malformed data URL");
                None
            }
        },
        UnifiedImageSource::Url { url } => match fetcher.fetch(url).await {
            Ok(image) => Some((image.media_type, STANDARD.encode(image.data))),
            Err(e) => {
                log::warn!("Dropping image part, fetching {url} failed: {e:#}");
                None
            }
        },
    }
}

/// Splits `data:<media type>[;base64],<payload>` into media type and base64 payload.
pub(crate) fn parse_data_url(url: &str) -> Option<(String, String)> {
    let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
    let mut params = header.split(';');
    let media_type = params.next().filter(|value| !value.is_empty()).unwrap_or("text/plain");
    let is_base64 = params.any(|param| param.eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        STANDARD.decode(payload).ok()?;
        payload.to_string()
    } else {
        STANDARD.encode(payload.as_bytes())
    };

    Some((media_type.to_string(), data))
}

/// Formats inline image data as a `data:` URL.
pub(crate) fn data_url(media_type: &str, data: &str) -> String {
    format!("data:{media_type};base64,{data}")
}

fn media_type_from_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next()?;
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();

    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
