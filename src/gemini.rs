//! Gemini API client
//!
//! Backs both intent classification (single-shot prompt) and general
//! conversational replies (system prompt + replayed history).
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::classifier::IntentModel;
use crate::error::OrchestrationError;
use crate::models::ChatMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Single-shot completion for a prompt (intent parsing path).
    pub async fn generate(&self, prompt: &str) -> crate::Result<String> {
        let request = GeminiRequest {
            contents: vec![Content {
                role: None,
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: None,
        };

        self.call(request).await
    }

    /// Conversational completion: a system prompt plus the full replayed
    /// history, ending with the latest user message. Continuity across turns
    /// lives entirely in `history`; nothing is stored server-side.
    pub async fn chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        last_message: &str,
    ) -> crate::Result<String> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|msg| Content {
                role: Some(if msg.role == "user" { "user" } else { "model" }.to_string()),
                parts: vec![Part {
                    text: msg.content.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: last_message.to_string(),
            }],
        });

        let request = GeminiRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: Some(SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            }),
        };

        self.call(request).await
    }

    async fn call(&self, request: GeminiRequest) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigurationError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.clone())
            .ok_or_else(|| {
                OrchestrationError::LlmError("Empty response from Gemini".to_string())
            })?;

        Ok(answer)
    }
}

#[async_trait]
impl IntentModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> crate::Result<String> {
        self.generate(prompt).await
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: "deposit 100 usdc".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("deposit 100 usdc"));
        assert!(json.contains("generationConfig"));
        assert!(!json.contains("systemInstruction"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_configuration_error() {
        let client = GeminiClient::new(String::new());
        let result = client.generate("deposit 100 usdc").await;
        assert!(matches!(
            result,
            Err(OrchestrationError::ConfigurationError(_))
        ));
    }
}
