use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use super::EncoderConfig;

/// Why the analyzer path could not produce features. Never leaves the
/// encoder: every variant routes to the deterministic fallback.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("analyzer disabled")]
    Disabled,
    #[error("analyzer request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("analyzer returned HTTP {0}")]
    Status(u16),
    #[error("analyzer timed out after {0:?}")]
    Timeout(Duration),
    #[error("analyzer response contained no numeric array")]
    Unparseable,
    #[error("analyzer failed: {0}")]
    Other(String),
}

/// External language-understanding service. Returns the raw response text;
/// parsing is the encoder's job.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, instruction: &str, text: &str) -> Result<String, EncodingError>;
}

/// Chat-completions style HTTP client.
pub struct HttpTextAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpTextAnalyzer {
    pub fn new(config: &EncoderConfig) -> Result<Self, EncodingError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request_body(&self, instruction: &str, text: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": instruction},
                {"role": "user", "content": text}
            ],
            "temperature": 0.0
        })
    }
}

/// Message content of a chat-completions reply, or the raw body when the
/// reply has some other shape (the array may still be in there).
fn response_content(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl TextAnalyzer for HttpTextAnalyzer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(&self, instruction: &str, text: &str) -> Result<String, EncodingError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(instruction, text));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EncodingError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(response_content(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_chat_completion_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"[0.1, 0.2]"}}]}"#;
        assert_eq!(response_content(body), "[0.1, 0.2]");
    }

    #[test]
    fn falls_back_to_raw_body_for_other_shapes() {
        assert_eq!(response_content("[0.3]"), "[0.3]");
        assert_eq!(response_content("not json"), "not json");
    }

    #[test]
    fn builds_request_with_instruction_and_text() {
        let analyzer = HttpTextAnalyzer::new(&EncoderConfig::default()).unwrap();
        let body = analyzer.request_body("return numbers", "laboratory");
        assert_eq!(body["messages"][0]["content"], "return numbers");
        assert_eq!(body["messages"][1]["content"], "laboratory");
        assert_eq!(body["model"], "gpt-4o-mini");
    }
}
