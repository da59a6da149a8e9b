//! A recording backend service for tests.

use super::BackendService;
use crate::{error::BoxError, function::ExecutionSettings, transcript::ChatTurn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One recorded completion request.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) turns: Vec<ChatTurn>,
    pub(crate) parameters: Map<String, Value>,
}

type Reply = dyn Fn(&[ChatTurn]) -> Result<String, BoxError> + Send + Sync;

/// Captures the submitted turns and replies with a scripted answer.
#[derive(Clone)]
pub(crate) struct MockService {
    model_id: String,
    reply: Arc<Reply>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    /// Always replies with the same text.
    pub(crate) fn new(model_id: impl Into<String>, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::with_reply(model_id, move |_| Ok(reply.clone()))
    }

    /// Replies with the content of the last turn.
    pub(crate) fn echo(model_id: impl Into<String>) -> Self {
        Self::with_reply(model_id, |turns| {
            Ok(turns.last().map(|turn| turn.content.clone()).unwrap_or_default())
        })
    }

    /// Fails every request.
    pub(crate) fn failing(model_id: impl Into<String>, message: &'static str) -> Self {
        Self::with_reply(model_id, move |_| Err(message.into()))
    }

    pub(crate) fn with_reply<F>(model_id: impl Into<String>, reply: F) -> Self
    where
        F: Fn(&[ChatTurn]) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        Self {
            model_id: model_id.into(),
            reply: Arc::new(reply),
            requests: Arc::default(),
        }
    }

    /// Returns the recorded requests.
    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl BackendService for MockService {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete_chat(
        &self,
        turns: &[ChatTurn],
        settings: &ExecutionSettings,
    ) -> Result<String, BoxError> {
        self.requests.lock().push(RecordedRequest {
            turns: turns.to_vec(),
            parameters: settings.parameters().clone(),
        });
        (self.reply)(turns)
    }
}
