//! Ollama chat generator.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::{Result, VerbaError};
use crate::registry::Component;
use crate::schema::{ComponentEntry, FieldSchema};

use super::{build_messages, ConversationEntry, Generator, TokenEvent};

const MODELS: [&str; 3] = ["llama3.2", "llama3.1", "mistral"];

const DEFAULT_SYSTEM: &str = "You are a helpful assistant. Answer using only the provided \
context and say so when the context does not contain the answer.";

pub struct OllamaGenerator {
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for OllamaGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for OllamaGenerator {
    fn name(&self) -> &str {
        "OllamaGenerator"
    }

    fn description(&self) -> &str {
        "Streams answers from a local Ollama instance"
    }

    fn required_env(&self) -> Vec<String> {
        vec!["OLLAMA_URL".to_string()]
    }

    fn required_libs(&self) -> Vec<String> {
        vec!["Ollama".to_string()]
    }

    fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
        BTreeMap::from([
            (
                "Model".to_string(),
                FieldSchema::dropdown(MODELS[0], &MODELS, "Chat model"),
            ),
            (
                "System Message".to_string(),
                FieldSchema::textarea(DEFAULT_SYSTEM, "System prompt prepended to every request"),
            ),
        ])
    }
}

/// Extract token text and the done flag from one NDJSON line.
fn parse_line(line: &str) -> Option<(String, bool)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let token = value
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Some((token, done))
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn context_window(&self) -> usize {
        4_096
    }

    async fn generate_stream(
        &self,
        config: &ComponentEntry,
        query: &str,
        context: &str,
        conversation: &[ConversationEntry],
    ) -> Result<mpsc::Receiver<TokenEvent>> {
        let model = config.str_field("Model")?.to_string();
        let system = config.str_field("System Message")?;
        let base = std::env::var("OLLAMA_URL")
            .map_err(|_| VerbaError::Config("OLLAMA_URL is not set".into()))?;
        let base = base.trim_end_matches('/').to_string();

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
                .post(format!("{base}/api/chat"))
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

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let Some((token, done)) = parse_line(&line) else {
                        continue;
                    };
                    if done {
                        finished = true;
                        let _ = tx.send(TokenEvent::stop(token)).await;
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
    fn parses_ndjson_token() {
        let line = r#"{"message":{"content":"hi"},"done":false}"#;
        assert_eq!(parse_line(line).unwrap(), ("hi".to_string(), false));
    }

    #[test]
    fn parses_done_line() {
        let line = r#"{"message":{"content":""},"done":true}"#;
        assert_eq!(parse_line(line).unwrap(), (String::new(), true));
    }
}
