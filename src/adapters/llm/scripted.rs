//! Scripted LLM used by tests and offline runs.
//!
//! Responses are replayed in order; every request is recorded so tests can
//! assert on the prompts the loop actually sent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::ports::{LlmClient, LlmError, LlmRequest};

#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<LlmRequest>>,
    /// Served when the scripted queue runs dry; `None` errors instead.
    fallback: Option<String>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(response.into());
    }

    /// Build with a queue of responses.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::new();
        for response in responses {
            llm.push_response(response);
        }
        llm
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Every request seen so far, in order.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);

        let next = self
            .responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();

        match next.or_else(|| self.fallback.clone()) {
            Some(response) => Ok(response),
            None => Err(LlmError::TransportFailure(
                "scripted response queue exhausted".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_errors() {
        let llm = ScriptedLlm::with_responses(["first", "second"]);

        assert_eq!(llm.complete(LlmRequest::new("s", "a")).await.unwrap(), "first");
        assert_eq!(llm.complete(LlmRequest::new("s", "b")).await.unwrap(), "second");
        assert!(llm.complete(LlmRequest::new("s", "c")).await.is_err());

        let recorded = llm.recorded_requests();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[1].user_prompt, "b");
    }

    #[tokio::test]
    async fn test_fallback_serves_forever() {
        let llm = ScriptedLlm::new().with_fallback("```python\npass\n```");
        for _ in 0..3 {
            assert!(llm.complete(LlmRequest::new("s", "u")).await.is_ok());
        }
    }
}
