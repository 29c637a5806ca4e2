use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChatRequest, ChatResponse, ChatTransport};
use crate::config::{health_url, HEALTH_CHECK_TIMEOUT};
use crate::error::TransportError;
use crate::stream::{FrameDecoder, StreamEvent};

/// HTTP client for the dual-model chat backend.
#[derive(Clone)]
pub struct ChatApiClient {
    client: Client,
    base_url: String,
    health_url: String,
}

impl ChatApiClient {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            health_url: health_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn error_from_response(response: Response, fallback: &str) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::from_status(status, &body, fallback)
}

#[async_trait]
impl ChatTransport for ChatApiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "API Error").await);
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let url = format!("{}/chat/stream", self.base_url);
        let request = ChatRequest {
            stream: Some(true),
            ..request.clone()
        };

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
            response = send => response?,
        };

        if !response.status().is_success() {
            return Err(error_from_response(response, "Stream Error").await);
        }

        debug!(model = %request.model, "stream opened");

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Aborted),
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        on_event(event);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        if let Some(event) = decoder.finish() {
            on_event(event);
        }

        debug!(model = %request.model, "stream closed");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(&self.health_url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }
}
