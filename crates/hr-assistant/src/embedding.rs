//! OpenAI-compatible embedding gateway.
//!
//! Calls `POST {base_url}/embeddings` with the configured model. One
//! [`embed`](EmbeddingGateway::embed) call is exactly one HTTP request;
//! batching and retry happen in the callers (ingestion and retrieval).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hr_assistant_core::embedding::EmbeddingGateway;
use hr_assistant_core::models::Embedding;
use hr_assistant_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::openai::{endpoint, post_json, Service};

pub struct OpenAiEmbeddings {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    /// Build the gateway from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the API key environment variable is not set.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self {
            client: Client::new(),
            url: endpoint(&config.base_url, "embeddings"),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbeddings {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, inputs = texts.len(), "requesting embeddings");

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let resp: EmbeddingResponse =
            post_json(&self.client, Service::Embeddings, &self.url, &self.api_key, &body).await?;

        let mut data = resp.data;
        if data.len() != texts.len() {
            return Err(Error::gateway_fatal(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        // The API may return items out of order.
        data.sort_by_key(|item| item.index);

        data.into_iter()
            .map(|item| {
                if item.embedding.len() != self.dims {
                    return Err(Error::DimensionMismatch {
                        expected: self.dims,
                        actual: item.embedding.len(),
                    });
                }
                Ok(Embedding::new(self.model.clone(), item.embedding))
            })
            .collect()
    }
}
