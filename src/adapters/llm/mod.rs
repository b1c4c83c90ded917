//! LLM adapters: the Anthropic client, the scripted test double, and code
//! extraction from free-form responses.

pub mod anthropic;
pub mod extract;
pub mod scripted;

pub use anthropic::AnthropicLlmClient;
pub use extract::extract_artifact;
pub use scripted::ScriptedLlm;

use crate::domain::ports::{GeneratedArtifact, LlmClient, LlmError, LlmRequest};

/// Complete a request and extract the code artifact from the response.
///
/// A response with no extractable code is an `InvalidResponse`; transport
/// errors propagate from the client's internal retry loop.
pub async fn generate_artifact(
    client: &dyn LlmClient,
    request: LlmRequest,
) -> Result<GeneratedArtifact, LlmError> {
    let raw = client.complete(request).await?;
    extract_artifact(&raw)
        .ok_or_else(|| LlmError::InvalidResponse("no extractable code in response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_artifact_extracts_code() {
        let llm = ScriptedLlm::with_responses(["Plan first.\n\n```python\nx = 1\n```"]);
        let artifact = generate_artifact(&llm, LlmRequest::new("s", "u")).await.unwrap();
        assert_eq!(artifact.source_code, "x = 1");
        assert_eq!(artifact.rationale, "Plan first.");
    }

    #[tokio::test]
    async fn test_generate_artifact_rejects_prose() {
        let llm = ScriptedLlm::with_responses(["I refuse."]);
        let err = generate_artifact(&llm, LlmRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
