//! OpenAI-compatible HTTP transport.
//!
//! Posts to `{base_url}/chat/completions` with a bearer key. Any
//! OpenAI-compatible endpoint works; switching providers is a base_url +
//! api_key change.

use super::{ChatRequest, ChatResponse, ChatTransport, TransportError};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking HTTP chat transport.
pub struct OpenAiTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiTransport {
    /// `base_url` falls back to the OpenAI endpoint; `api_key` falls back to
    /// the `OPENAI_API_KEY` environment variable (then to a dummy value so a
    /// keyless local endpoint still works).
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "dummy".to_string());
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }
}

impl ChatTransport for OpenAiTransport {
    fn create(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}
