//! OpenAI chat completion generator.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::{Result, VerbaError};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{build_messages, ConversationEntry, Generator, TokenEvent};

const MODELS: [&str; 2] = ["gpt-4o", "gpt-4o-mini"];

const DEFAULT_SYSTEM: &str = "You are a helpful assistant. Answer using only the provided \
context and say so when the context does not contain the answer.";

pub struct OpenAiGenerator {
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(180))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for OpenAiGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for OpenAiGenerator {
    fn name(&self) -> &str {
        "OpenAIGenerator"
    }

    fn description(&self) -> &str {
        "Streams answers from the OpenAI chat completions API"
    }

    fn required_env(&self) -> Vec<String> {
        vec!["OPENAI_API_KEY".to_string()]
    }

    fn required_libs(&self) -> Vec<String> {
        vec!["OpenAI".to_string()]
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Model".to_string(),
                FieldSchema::dropdown(MODELS[0], &MODELS, "Chat model"),
            ),
            (
                "URL".to_string(),
                FieldSchema::text("https://api.openai.com/v1", "API base URL"),
            ),
            (
                "System Message".to_string(),
                FieldSchema::textarea(DEFAULT_SYSTEM, "System prompt prepended to every request"),
            ),
        ])
    }
}

/// Extract token text and finish reason from one SSE data payload.
fn parse_delta(data: &str) -> Option<(String, Option<String>)> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let choice = value.get("choices")?.as_array()?.first()?;
    let token = choice
        .pointer("/delta/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let finish = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(str::to_string);
    Some((token, finish))
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn context_window(&self) -> usize {
        10_000
    }

    async fn generate_stream(
        &self,
        config: &ComponentEntry,
        query: &str,
        context: &str,
        conversation: &[ConversationEntry],
    ) -> Result<mpsc::Receiver<TokenEvent>> {
        let model = config.str_field("Model")?.to_string();
        let base = config.str_field("URL")?.trim_end_matches('/').to_string();
        let system = config.str_field("System Message")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| VerbaError::Config("OPENAI_API_KEY is not set".into()))?;

        let messages = build_messages(system, conversation, query, context, self.context_window());
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        tokio::spawn(async move {
            let response = client
                .post(format!("{base}/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    let status = r.status();
                    let _ = tx.send(TokenEvent::stop(format!("upstream error: {status}"))).await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(TokenEvent::stop(format!("request failed: {e}"))).await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut finished = false;
            'recv: while let Some(part) = stream.next().await {
                let Ok(bytes) = part else { break };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // events are newline-delimited; keep the trailing
                // partial line in the buffer
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'recv;
                    }
                    let Some((token, finish)) = parse_delta(data) else {
                        continue;
                    };
                    if let Some(reason) = finish {
                        finished = true;
                        let _ = tx
                            .send(TokenEvent {
                                message: token,
                                finish_reason: reason,
                            })
                            .await;
                        break 'recv;
                    }
                    if !token.is_empty() && tx.send(TokenEvent::token(token)).await.is_err() {
                        return;
                    }
                }
            }
            if !finished {
                let _ = tx.send(TokenEvent::stop("")).await;
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let (token, finish) = parse_delta(data).unwrap();
        assert_eq!(token, "Hel");
        assert!(finish.is_none());
    }

    #[test]
    fn parses_finish_reason() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let (token, finish) = parse_delta(data).unwrap();
        assert!(token.is_empty());
        assert_eq!(finish.as_deref(), Some("stop"));
    }

    #[test]
    fn malformed_payload_is_skipped() {
        assert!(parse_delta("{not json").is_none());
        assert!(parse_delta(r#"{"choices":[]}"#).is_none());
    }
}
