/// OpenAI-compatible chat completions client
use super::{Generation, GenerationError, TextGenerator, TokenUsage};
use crate::config::GenerationConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub struct RemoteGenerator {
    client: Client,
    url: String,
    model: String,
}

impl RemoteGenerator {
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        if let Ok(key) = std::env::var(&cfg.api_key_env) {
            let value = format!("Bearer {}", key).parse().map_err(|_| {
                GenerationError::InitializationError("Invalid API key".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for RemoteGenerator {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Generation, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestError(e.to_string()))?;
        let json: Value = res
            .error_for_status()
            .map_err(|e| GenerationError::RequestError(e.to_string()))?
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        parse_chat_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_chat_response(json: &Value) -> Result<Generation, GenerationError> {
    let text = json
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            GenerationError::InvalidResponse("Response is missing message content".to_string())
        })?;

    let usage = json.get("usage").map(|u| {
        let field = |name: &str| u.get(name).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        TokenUsage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        }
    });

    Ok(Generation {
        text: text.trim().to_string(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let json = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  Foundation design criteria \n" } }
            ],
            "usage": { "prompt_tokens": 21, "completion_tokens": 5, "total_tokens": 26 }
        });
        let parsed = parse_chat_response(&json).unwrap();
        assert_eq!(parsed.text, "Foundation design criteria");
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(26));
    }

    #[test]
    fn missing_usage_is_optional() {
        let json = serde_json::json!({
            "choices": [ { "message": { "content": "x" } } ]
        });
        assert_eq!(parse_chat_response(&json).unwrap().usage, None);
    }

    #[test]
    fn rejects_response_without_choices() {
        let err = parse_chat_response(&serde_json::json!({ "error": "overloaded" })).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn builds_url_from_config() {
        let cfg = GenerationConfig {
            api_base: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        let generator = RemoteGenerator::from_config(&cfg).unwrap();
        assert_eq!(generator.url, "http://localhost:11434/v1/chat/completions");
        assert_eq!(generator.model_name(), "gpt-4o-mini");
    }
}
