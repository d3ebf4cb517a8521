use crate::llm::client::{LLMClient, LLMResponse, ToolDefinition};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    Ollama,
};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String) -> Result<Self> {
        let (host, port) = split_endpoint(base_url)?;
        Ok(Self {
            client: Ollama::new(host, port),
            model,
        })
    }
}

/// Splits `http://host:port` into the `(scheme://host, port)` pair ollama-rs
/// expects. A missing port falls back to Ollama's default.
fn split_endpoint(base_url: &str) -> Result<(String, u16)> {
    let parsed = url::Url::parse(base_url).map_err(|e| {
        AppError::Configuration(format!("Invalid Ollama base_url '{}': {}", base_url, e))
    })?;
    let host = parsed.host_str().ok_or_else(|| {
        AppError::Configuration(format!("Ollama base_url '{}' has no host", base_url))
    })?;
    let port = parsed.port().unwrap_or(DEFAULT_PORT);
    Ok((format!("{}://{}", parsed.scheme(), host), port))
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<LLMResponse> {
        let messages = vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ];

        let request = ChatMessageRequest::new(self.model.clone(), messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::Reasoning(format!("Ollama error: {}", e)))?;

        Ok(LLMResponse::text(response.message.content))
    }

    async fn generate_with_tools(
        &self,
        system: &str,
        prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        // No tool calls from this provider; coordinated dispatch falls back to
        // parallel fan-out when a pass acknowledges nothing.
        self.generate_with_system(system, prompt).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_endpoint_full() {
        let (host, port) = split_endpoint("http://localhost:11434").unwrap();
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn test_split_endpoint_no_port() {
        let (host, port) = split_endpoint("http://localhost").unwrap();
        assert_eq!(host, "http://localhost");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn test_split_endpoint_custom_port() {
        let (host, port) = split_endpoint("http://192.168.1.100:8080").unwrap();
        assert_eq!(host, "http://192.168.1.100");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_split_endpoint_rejects_garbage() {
        assert!(matches!(
            split_endpoint("not a url"),
            Err(AppError::Configuration(_))
        ));
    }
}
