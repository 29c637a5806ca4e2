pub mod client;
pub mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::stream::StreamEvent;

pub use client::ChatApiClient;
pub use types::{ChatRequest, ChatResponse};

/// The two chat operations plus a liveness probe.
///
/// Implementations keep no per-request state and never retry.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// One-shot completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;

    /// Streams a completion, calling `on_event` for each decoded event in
    /// arrival order. Returns [`TransportError::Aborted`] once `cancel` fires.
    async fn stream(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// `false` on any failure; never errors.
    async fn health_check(&self) -> bool;
}
