//! Embedding providers.
//!
//! An [`Embedder`] turns texts into vectors through a remote API. All
//! built-in providers batch requests, retry transient upstream
//! failures with exponential backoff, and surface rate limiting as
//! [`VerbaError::RateLimit`].

pub mod ollama;
pub mod openai;

use async_trait::async_trait;

use crate::error::{Result, VerbaError};
use crate::registry::Component;
use crate::schema::ComponentEntry;

/// A pluggable embedding provider.
#[async_trait]
pub trait Embedder: Component {
    /// Largest number of texts a single upstream request may carry.
    fn max_batch_size(&self) -> usize {
        96
    }

    /// Vectorize `texts`, one vector per input, in input order.
    async fn vectorize(
        &self,
        config: &ComponentEntry,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>>;
}

/// Vectorize `texts` in provider-sized batches and enforce the
/// one-vector-per-input contract across the whole call.
pub async fn vectorize_checked(
    embedder: &dyn Embedder,
    config: &ComponentEntry,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(embedder.max_batch_size().max(1)) {
        let got = embedder.vectorize(config, batch).await?;
        if got.len() != batch.len() {
            return Err(VerbaError::EmbeddingContract {
                expected: batch.len(),
                got: got.len(),
            });
        }
        vectors.extend(got);
        tokio::task::yield_now().await;
    }
    Ok(vectors)
}

/// Retry policy shared by the HTTP providers: transient failures
/// (connect errors, 5xx) back off 1s, 2s, 4s before giving up;
/// HTTP 429 is surfaced immediately with the server's retry hint.
pub(crate) async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    const MAX_RETRIES: u32 = 3;
    let mut attempt = 0u32;
    loop {
        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let err = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| VerbaError::Embedding(format!("invalid response body: {e}")));
                }
                if status.as_u16() == 429 {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    return Err(VerbaError::RateLimit { retry_after });
                }
                let text = response.text().await.unwrap_or_default();
                if status.is_server_error() {
                    VerbaError::Embedding(format!("upstream {status}: {text}"))
                } else {
                    // other 4xx will not succeed on retry
                    return Err(VerbaError::Embedding(format!("upstream {status}: {text}")));
                }
            }
            Err(e) => VerbaError::Embedding(format!("request failed: {e}")),
        };

        if attempt >= MAX_RETRIES {
            return Err(err);
        }
        let delay = std::time::Duration::from_secs(1 << attempt);
        tracing::warn!(url, attempt, ?delay, error = %err, "embedding request failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Parse a JSON array of float arrays into vectors.
pub(crate) fn parse_vectors(value: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let rows = value
        .as_array()
        .ok_or_else(|| VerbaError::Embedding("expected an array of embeddings".into()))?;
    rows.iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| VerbaError::Embedding("expected an embedding array".into()))?
                .iter()
                .map(|n| {
                    n.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| VerbaError::Embedding("non-numeric embedding value".into()))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::registry::{meta, Env};
    use crate::schema::FieldSchema;

    struct StubEmbedder {
        batch: usize,
        short_by: usize,
        calls: AtomicUsize,
    }

    impl Component for StubEmbedder {
        fn name(&self) -> &str {
            "Stub"
        }
        fn description(&self) -> &str {
            "test embedder"
        }
        fn config_schema(&self) -> BTreeMap<String, FieldSchema> {
            BTreeMap::new()
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn max_batch_size(&self) -> usize {
            self.batch
        }

        async fn vectorize(
            &self,
            _config: &ComponentEntry,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = texts.len().saturating_sub(self.short_by);
            Ok((0..n).map(|i| vec![i as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn batches_and_preserves_order() {
        let embedder = StubEmbedder {
            batch: 4,
            short_by: 0,
            calls: AtomicUsize::new(0),
        };
        let config = meta(&embedder, "Embedder", &Env::default());
        let texts: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let vectors = vectorize_checked(&embedder, &config, &texts).await.unwrap();
        assert_eq!(vectors.len(), 10);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn short_batch_is_a_contract_violation() {
        let embedder = StubEmbedder {
            batch: 8,
            short_by: 1,
            calls: AtomicUsize::new(0),
        };
        let config = meta(&embedder, "Embedder", &Env::default());
        let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let err = vectorize_checked(&embedder, &config, &texts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerbaError::EmbeddingContract {
                expected: 5,
                got: 4
            }
        ));
    }

    #[test]
    fn parse_vectors_rejects_non_numeric() {
        let good = serde_json::json!([[0.1, 0.2], [0.3, 0.4]]);
        assert_eq!(parse_vectors(&good).unwrap().len(), 2);
        let bad = serde_json::json!([[0.1, "x"]]);
        assert!(parse_vectors(&bad).is_err());
    }
}
