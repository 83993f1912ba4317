use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Minimal Anthropic Messages API client: one user message in, the first
/// text block out. No streaming, no tools.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl LlmClient {
    /// Build a client from `ANTHROPIC_API_KEY`. A missing key is an ordinary
    /// error; callers downgrade it rather than crash the run.
    pub fn from_env(config: &Config) -> Result<Self> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY not set")?;
        let http = reqwest::Client::builder()
            .timeout(config.model_timeout)
            .build()
            .context("Failed to build model HTTP client")?;
        Ok(Self {
            http,
            api_key,
            base_url: config.anthropic_base_url.clone(),
            model: config.model.clone(),
        })
    }

    /// Send one prompt and return the model's text response.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Calling model {} ({} max tokens)", self.model, max_tokens);
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("Model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Model API returned {status}: {body}");
        }

        let body: MessagesResponse = response
            .json()
            .await
            .context("Failed to decode model response")?;
        body.content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .context("Model response contained no text block")
    }
}
