//! HTTP inference client.
//!
//! Endpoint: POST <endpoint> with the raw payload as body
//! Auth: optional Bearer token
//! Response: JSON array of `{label, score}`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{rank_predictions, Classifier, Prediction};

/// Classifier backed by an HTTP inference service
pub struct HttpClassifier {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpClassifier {
    /// Create a new client
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            token,
            client,
        })
    }

    /// Create from the resolved configuration
    pub fn from_config() -> Result<Self> {
        let config = crate::config::config()?;
        Self::new(
            config.classifier.endpoint.clone(),
            config.classifier.token.clone(),
            Duration::from_secs(config.classifier.timeout_seconds),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn infer(&self, payload: &[u8]) -> Result<Vec<Prediction>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(payload.to_vec());

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach classifier at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Classifier error ({}): {}", status, text.trim());
        }

        let predictions: Vec<Prediction> = response
            .json()
            .await
            .context("Failed to parse classifier response")?;

        Ok(rank_predictions(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let classifier = HttpClassifier::new(
            "http://127.0.0.1:8080/classify",
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(classifier.name(), "http");
        assert_eq!(classifier.endpoint(), "http://127.0.0.1:8080/classify");
    }

    #[test]
    fn test_response_shape() {
        let body = r#"[{"label":"tabby","score":0.41},{"label":"tiger cat","score":0.52}]"#;
        let predictions: Vec<Prediction> = serde_json::from_str(body).unwrap();
        let ranked = rank_predictions(predictions);

        assert_eq!(ranked[0].label, "tiger cat");
    }
}
