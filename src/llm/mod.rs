//! LLM integration.
//!
//! Defines the `ChatModel` trait used by the prompt runner, the judge
//! scorer and the prompt mutator, plus the OpenAI implementation.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

/// A single system + user chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a strict JSON object response.
    pub json_response: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.7,
            max_tokens: None,
            json_response: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// Abstraction over chat-completion providers.
///
/// Implementors return the text of the first completion choice. Errors
/// cover transport failures and non-success responses; interpreting the
/// text is up to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = ChatRequest::new("gpt-4o-mini", "sys", "user")
            .temperature(0.1)
            .max_tokens(200)
            .json();
        assert_eq!(req.model, "gpt-4o-mini");
        assert!((req.temperature - 0.1).abs() < 1e-6);
        assert_eq!(req.max_tokens, Some(200));
        assert!(req.json_response);
    }

    #[tokio::test]
    async fn test_mock_chat_model() {
        let mut mock = MockChatModel::new();
        mock.expect_complete()
            .withf(|req| req.json_response)
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let req = ChatRequest::new("m", "s", "u").json();
        assert_eq!(mock.complete(&req).await.unwrap(), "{}");
    }
}
