//! Contract of the external reasoning service.

use crate::error::SwarmError;
use async_trait::async_trait;

/// A slow, unreliable text-completion backend.
///
/// Implementations only promise `prompt -> completion`. They may fail with
/// a transient `SwarmError::ExternalService`; retrying is the caller's job.
#[async_trait]
pub trait ReasoningService: Send + Sync + 'static {
    /// Returns a completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError>;
}

#[async_trait]
impl<S> ReasoningService for std::sync::Arc<S>
where
    S: ReasoningService + ?Sized,
{
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        (**self).complete(prompt).await
    }
}
