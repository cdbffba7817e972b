//! End-to-end request preparation: route, resolve images, convert, and open
//! stream sessions for the response side.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{BackendFamily, ModelAdapter};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::factory::AdapterFactory;
use crate::images::{collect_remote_urls, HttpImageFetcher, ImageFetcher, ResolvedImages};
use crate::reassembler::StreamingReassembler;
use crate::stream::reassemble_stream;
use crate::translate::canonical_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
};

/// Converts canonical requests into backend invoke bodies and backend output
/// back into canonical responses.
#[derive(Clone)]
pub struct Bridge {
    factory: AdapterFactory,
    fetcher: Arc<dyn ImageFetcher>,
}

/// A request converted for one backend, together with the adapter that will
/// read its response.
pub struct PreparedRequest {
    pub model: String,
    pub adapter: Box<dyn ModelAdapter>,
    pub body: Value,
    pub streaming: bool,
}

impl Bridge {
    /// Bridge with an HTTP image fetcher built from `config.images`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.images.fetch_timeout_secs))
            .build()?;
        let fetcher = HttpImageFetcher::new(client, &config.images);
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: BridgeConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            factory: AdapterFactory::new(config),
            fetcher,
        }
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Route and convert `req`. Remote images are fetched first, as one batch,
    /// and only for families that can carry them.
    ///
    /// # Errors
    /// `Configuration` for an unknown model, `UnsupportedCapability` for a
    /// streaming request to a family that cannot stream, and any conversion or
    /// validation failure from the adapter.
    pub async fn prepare(&self, req: &ChatCompletionRequest) -> Result<PreparedRequest> {
        let adapter = self.factory.resolve(&req.model)?;
        let family = adapter.family();
        let streaming = req.is_streaming();

        if streaming && !family.supports_streaming() {
            return Err(BridgeError::unsupported(family.name(), "streaming"));
        }

        let images = self.resolve_images(family, req).await;

        let body = if streaming {
            adapter.convert_stream_request(req, &images)?
        } else {
            adapter.convert_request(req, &images)?
        };

        tracing::debug!(model = %req.model, family = %family, streaming, "Prepared request");

        Ok(PreparedRequest {
            model: req.model.clone(),
            adapter,
            body,
            streaming,
        })
    }

    async fn resolve_images(
        &self,
        family: BackendFamily,
        req: &ChatCompletionRequest,
    ) -> ResolvedImages {
        if !family.accepts_images() {
            return ResolvedImages::new();
        }
        let urls = collect_remote_urls(req);
        if urls.is_empty() {
            return ResolvedImages::new();
        }
        self.fetcher.fetch_all(&urls).await
    }

    /// Fresh reassembler for one response stream of `prepared`.
    ///
    /// # Errors
    /// Returns `UnsupportedCapability` if the family cannot stream.
    pub fn open_stream(&self, prepared: &PreparedRequest) -> Result<StreamingReassembler> {
        let converter = prepared.adapter.stream_converter(&prepared.model)?;
        Ok(StreamingReassembler::new(
            converter,
            self.factory.config().stream.on_parse_error,
        ))
    }

    /// Canonical chunks for the backend byte stream answering `prepared`.
    ///
    /// # Errors
    /// Returns `UnsupportedCapability` if the family cannot stream.
    pub fn stream_response<S, E>(
        &self,
        prepared: &PreparedRequest,
        bytes: S,
    ) -> Result<impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BridgeError> + Send + 'static,
    {
        Ok(reassemble_stream(bytes, self.open_stream(prepared)?))
    }
}

impl PreparedRequest {
    pub fn family(&self) -> BackendFamily {
        self.adapter.family()
    }

    /// Convert the backend's complete response body.
    ///
    /// # Errors
    /// Returns the adapter's conversion error.
    pub fn convert_response(&self, body: &Value) -> Result<ChatCompletionResponse> {
        self.adapter.convert_response(body, &self.model)
    }
}
