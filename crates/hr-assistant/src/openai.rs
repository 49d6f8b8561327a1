//! Shared plumbing for the OpenAI-compatible HTTP clients.
//!
//! Status handling is the same for embeddings and chat completions:
//!
//! | Outcome | Classification |
//! |---------|----------------|
//! | network error | retryable |
//! | HTTP 429 | [`Error::RateLimited`] |
//! | HTTP 5xx | retryable |
//! | other HTTP 4xx | fatal |
//! | undecodable body | fatal |

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use hr_assistant_core::{Error, Result};

/// Which service a request targets, deciding which error variant it maps to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Service {
    Embeddings,
    Chat,
}

impl Service {
    fn error(self, message: String, retryable: bool) -> Error {
        match (self, retryable) {
            (Service::Embeddings, true) => Error::gateway(message),
            (Service::Embeddings, false) => Error::gateway_fatal(message),
            (Service::Chat, true) => Error::generation(message),
            (Service::Chat, false) => Error::generation_fatal(message),
        }
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// POST `body` as JSON and decode the JSON response.
pub(crate) async fn post_json<B, T>(
    client: &Client,
    service: Service,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let resp = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| service.error(format!("request to {} failed: {}", url, e), true))?;

    let resp = check_status(service, resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| service.error(format!("malformed response from {}: {}", url, e), false))
}

async fn check_status(service: Service, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("API error {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited(message));
    }
    Err(service.error(message, status.is_server_error()))
}
