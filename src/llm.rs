//! The LLM provider collaborator (§6): text-in/text-out with an optional
//! `previous_response_id` for response chaining.
//!
//! The Worker stores one response id per atom and uses the last
//! dependency's id as the previous id for an atom's first generation, and
//! the atom's own prior id for repairs. Providers that do not support
//! chaining are expected to echo back `None`; callers must treat that as
//! a no-op, not an error (§9, "Response chaining").

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::retry_external_call;

/// One request to the LLM: a prompt and an optional continuation token
/// from a prior call this one should be chained from.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub prompt: String,
    pub previous_response_id: Option<String>,
}

/// The provider's reply: generated text plus the opaque id (if any) that
/// identifies this response for future chaining.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub response_id: Option<String>,
}

/// Retry/timeout policy applied uniformly to every provider call.
#[derive(Debug, Clone, Copy)]
pub struct LlmRetryPolicy {
    pub max_attempts: u64,
    pub timeout: Duration,
}

impl Default for LlmRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            // §5: default external-call timeout for LLM calls is 300s.
            timeout: Duration::from_secs(300),
        }
    }
}

/// Text-in/text-out LLM provider. Implementations own their own HTTP
/// client, auth, and wire format; this crate only depends on the trait.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Wraps any [`LlmProvider`] with the crate's uniform retry/timeout
/// policy, so callers (Planner, Worker) never reimplement backoff.
pub struct RetryingLlmClient<P: LlmProvider> {
    inner: P,
    policy: LlmRetryPolicy,
}

impl<P: LlmProvider> RetryingLlmClient<P> {
    pub fn new(inner: P, policy: LlmRetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        retry_external_call(self.policy.max_attempts, || {
            let request = request.clone();
            async {
                tokio::time::timeout(self.policy.timeout, self.inner.complete(request))
                    .await
                    .map_err(|_| Error::ExternalCall("LLM call timed out".to_string()))?
            }
        })
        .await
    }
}

/// An OpenAI-compatible chat-completions provider, the default transport
/// for the CLI entry point. Credentials come from [`crate::config::RunConfig`].
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    previous_response_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            previous_response_id: request.previous_response_id.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalCall(format!("LLM request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::ExternalCall(format!(
                "LLM returned status {}",
                response.status()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalCall(format!("malformed LLM response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::ExternalCall("LLM response had no choices".to_string()))?;

        Ok(LlmResponse {
            text,
            response_id: parsed.id,
        })
    }
}
