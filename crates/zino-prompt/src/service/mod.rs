//! Backend services completing chat transcripts.

use crate::{error::BoxError, function::ExecutionSettings, transcript::ChatTurn};

mod openai;
mod selector;

#[cfg(test)]
pub(crate) mod mock;

pub use openai::OpenAiChatService;
pub use selector::{ServiceSelection, select_service};

/// Underlying trait of all backend services for implementors.
#[async_trait::async_trait]
pub trait BackendService: Send + Sync {
    /// Returns the model id matched by execution settings.
    fn model_id(&self) -> &str;

    /// Completes the chat, forwarding the request parameters of the settings.
    /// Retries and timeouts are up to the implementor.
    async fn complete_chat(
        &self,
        turns: &[ChatTurn],
        settings: &ExecutionSettings,
    ) -> Result<String, BoxError>;
}
