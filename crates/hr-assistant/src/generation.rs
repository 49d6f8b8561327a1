//! OpenAI-compatible chat-completion client.
//!
//! Implements [`Generator`] against `POST {base_url}/chat/completions`.
//! Sampling settings come from the [`GenerationRequest`], so the answer
//! synthesizer controls temperature and the token ceiling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hr_assistant_core::answer::{GenerationRequest, Generator, PromptMessage};
use hr_assistant_core::{Error, Result};

use crate::config::GenerationConfig;
use crate::openai::{endpoint, post_json, Service};

pub struct OpenAiChat {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// [`Error::Config`] if the API key environment variable is not set.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self {
            client: Client::new(),
            url: endpoint(&config.base_url, "chat/completions"),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            "requesting chat completion"
        );
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let resp: ChatResponse =
            post_json(&self.client, Service::Chat, &self.url, &self.api_key, &body).await?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::generation_fatal("response contained no message content"))
    }
}
