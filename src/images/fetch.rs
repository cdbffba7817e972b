//! Batch resolution of remote image references.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::time::Duration;

use super::{is_remote_url, sniff_media_type, InlineImage, ResolvedImages};
use crate::config::ImageConfig;
use crate::error::{BridgeError, Result};

/// Resolves a batch of image URLs to inline payloads.
///
/// Partial results are expected: a URL that cannot be resolved is simply
/// missing from the returned map. `data:` URLs are passed through untouched.
pub trait ImageFetcher: Send + Sync {
    fn fetch_all<'a>(&'a self, urls: &'a [String]) -> BoxFuture<'a, ResolvedImages>;
}

/// Fetches images over HTTP with bounded concurrency.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_concurrency: usize,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client, config: &ImageConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_concurrency: config.max_concurrent_fetches.max(1),
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<InlineImage> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .filter(|v| v.starts_with("image/"));

        let bytes = response.bytes().await?;

        let media_type = header_type
            .or_else(|| sniff_media_type(&bytes).map(str::to_string))
            .ok_or_else(|| BridgeError::image(format!("{url} did not return an image")))?;

        Ok(InlineImage::from_bytes(media_type, &bytes))
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch_all<'a>(&'a self, urls: &'a [String]) -> BoxFuture<'a, ResolvedImages> {
        Box::pin(async move {
            let (mut resolved, remote) = split_inline(urls);

            let results: Vec<(&String, Result<InlineImage>)> = stream::iter(remote)
                .map(|url| async move { (url, self.fetch_one(url).await) })
                .buffer_unordered(self.max_concurrency)
                .boxed()
                .collect()
                .await;

            for (url, result) in results {
                match result {
                    Ok(image) => {
                        resolved.insert(url.clone(), image);
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Image fetch failed");
                    }
                }
            }

            tracing::debug!(requested = urls.len(), resolved = resolved.len(), "Resolved images");
            resolved
        })
    }
}

/// Serves images from a table the caller already holds. Never touches the
/// network.
#[derive(Debug, Clone, Default)]
pub struct PrefetchedImages(pub ResolvedImages);

impl ImageFetcher for PrefetchedImages {
    fn fetch_all<'a>(&'a self, urls: &'a [String]) -> BoxFuture<'a, ResolvedImages> {
        Box::pin(async move {
            let (mut resolved, remote) = split_inline(urls);
            for url in remote {
                if let Some(image) = self.0.get(url) {
                    resolved.insert(url.clone(), image.clone());
                }
            }
            resolved
        })
    }
}

fn split_inline(urls: &[String]) -> (ResolvedImages, Vec<&String>) {
    let mut resolved = ResolvedImages::new();
    let mut remote = Vec::new();
    for url in urls {
        if let Some(image) = InlineImage::from_data_url(url) {
            resolved.insert(url.clone(), image);
        } else if is_remote_url(url) {
            remote.push(url);
        } else {
            tracing::warn!(url = %url, "Unsupported image reference");
        }
    }
    (resolved, remote)
}
