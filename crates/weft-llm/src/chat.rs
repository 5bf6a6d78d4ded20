use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LanguageModel;

/// OpenAI-compatible non-streaming chat client. Works with OpenAI, Ollama,
/// vLLM, Groq, OpenRouter, etc.
pub struct HttpChatModel {
    http: Client,
    config: ModelConfig,
}

impl HttpChatModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LanguageModel for HttpChatModel {
    fn generate(&self, system_prompt: &str, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt.to_string(),
        });

        let body = ChatRequest {
            model: self.config.model_id.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        Box::pin(async move {
            debug!(model = %self.config.model_id, url = %url, "Chat completion request");
            let mut req = self.http.post(&url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| WeftError::LlmRequest(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                if status.as_u16() == 429 {
                    return Err(WeftError::RateLimited(format!("HTTP 429: {}", body)));
                }
                return Err(WeftError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| WeftError::LlmRequest(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| WeftError::LlmRequest("empty completion".to_string()))
        })
    }
}
