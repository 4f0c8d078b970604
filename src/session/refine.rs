//! Optional natural-language rewrite of recognized labels.

use std::{future::Future, pin::Pin, time::Duration};

use anyhow::{anyhow, bail, Context};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::settings::RefinementSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that refines sign language translations into natural, conversational language.";

pub type RefineFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Rewrites a raw gesture label into natural phrasing.
pub trait Refiner: Send + Sync + 'static {
    fn refine<'a>(&'a self, label: &'a str, language: &'a str) -> RefineFuture<'a>;
}

/// Asks `refiner` for a rewrite of `label`, bounded by `timeout`.
///
/// Returns `None` (meaning: show the raw label) when there is no refiner, or
/// it fails, times out or answers with blank text.
pub async fn refine_or_fallback(
    refiner: Option<&dyn Refiner>,
    label: &str,
    language: &str,
    timeout: Duration,
) -> Option<String> {
    let refiner = refiner?;
    match tokio::time::timeout(timeout, refiner.refine(label, language)).await {
        Ok(Ok(text)) => {
            let text = text.trim();
            if text.is_empty() {
                log_debug!("refiner returned nothing for '{label}'");
                None
            } else {
                Some(text.to_string())
            }
        }
        Ok(Err(err)) => {
            log_warn!("refinement of '{label}' failed: {err:#}");
            None
        }
        Err(_) => {
            log_warn!("refinement of '{label}' timed out after {timeout:?}");
            None
        }
    }
}

/// The user prompt sent to a chat model for one label.
pub fn refinement_prompt(label: &str, language: &str) -> String {
    format!(
        "Refine this sign language translation to make it more natural and conversational: '{label}'. Language: {language}."
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// [`Refiner`] backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiRefiner {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiRefiner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn from_settings(settings: &RefinementSettings) -> Self {
        Self::new(
            settings.endpoint.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, label: &str, language: &str) -> anyhow::Result<String> {
        let Some(api_key) = &self.api_key else {
            bail!("no OpenAI API key configured");
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: refinement_prompt(label, language),
                },
            ],
            max_tokens: 100,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("failed to reach chat completions endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("chat completions endpoint returned {status}");
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("failed to parse chat completions response")?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("chat completions response had no choices"))
    }
}

impl Refiner for OpenAiRefiner {
    fn refine<'a>(&'a self, label: &'a str, language: &'a str) -> RefineFuture<'a> {
        Box::pin(self.call(label, language))
    }
}
