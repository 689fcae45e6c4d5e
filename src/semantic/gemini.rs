//! Google Gemini embedding provider (`text-embedding-004`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::semantic::embeddings::{l2_normalize, EmbeddingProvider, ProviderError};
use crate::semantic::types::Embedding;

/// Header carrying the API key, so it never appears in request URLs.
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(config.is_configured(), "missing Gemini API key");
        anyhow::ensure!(!config.model.trim().is_empty(), "missing Gemini model name");

        let client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build Gemini HTTP client: {e}"))?;
        let model = config.model.trim().trim_start_matches("models/").to_string();
        let endpoint = format!(
            "{}/models/{}:embedContent",
            config.base_url.trim_end_matches('/'),
            model
        );

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.trim().to_string(),
            model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, timeout: Duration) -> Result<Embedding, ProviderError> {
        let model = format!("models/{}", self.model);
        let request = EmbedContentRequest {
            model: &model,
            content: Content {
                parts: [Part { text }],
            },
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &body));
        }

        let body = resp.text().await.map_err(classify_transport_error)?;
        parse_embedding(&body)
    }
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    let err = err.without_url();
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::network(err.to_string())
    } else {
        ProviderError::rejected(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("Gemini embeddings request failed ({status}): {body}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::quota(message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        ProviderError::timeout(message)
    } else if status.is_server_error() {
        ProviderError::network(message)
    } else {
        ProviderError::rejected(message)
    }
}

fn parse_embedding(body: &str) -> Result<Embedding, ProviderError> {
    let parsed: EmbedContentResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::rejected(format!("failed to parse Gemini response: {e}")))?;

    if parsed.embedding.values.is_empty() {
        return Err(ProviderError::rejected("Gemini returned an empty embedding"));
    }

    Ok(Embedding::from(l2_normalize(parsed.embedding.values)))
}
