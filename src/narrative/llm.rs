//! Language model clients.

use crate::config::{ModelConfig, Provider};
use crate::error::RecapError;
use crate::http;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A text completion backend.
///
/// Implementations make a single attempt; timeouts and retries are applied
/// by the caller.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier recorded in the run report.
    fn name(&self) -> String;

    /// Complete `context` under the system `instruction`.
    async fn complete(&self, instruction: &str, context: &str) -> Result<String, RecapError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API.
pub struct AnthropicModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicModel {
    pub fn new(config: &ModelConfig, api_key: &str, timeout: Duration) -> Result<Self, RecapError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            url: config.effective_url().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.effective_name(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, instruction: &str, context: &str) -> Result<String, RecapError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: instruction,
            messages: vec![AnthropicMessage {
                role: "user",
                content: context,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::transport_error("llm", e))?;
        let response = http::check_status("llm", response).await?;
        let body: AnthropicResponse = http::decode("llm", response).await?;

        Ok(body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

/// Local Ollama server, `/api/chat` without streaming.
pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaModel {
    pub fn new(config: &ModelConfig, timeout: Duration) -> Result<Self, RecapError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            url: config.effective_url().trim_end_matches('/').to_string(),
            model: config.effective_name(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, instruction: &str, context: &str) -> Result<String, RecapError> {
        let url = format!("{}/api/chat", self.url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: instruction,
                },
                OllamaMessage {
                    role: "user",
                    content: context,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RecapError::transient("llm", format!("cannot connect to Ollama at {}", self.url))
                } else {
                    http::transport_error("llm", e)
                }
            })?;
        let response = http::check_status("llm", response).await?;
        let chat: OllamaChatResponse = http::decode("llm", response).await?;

        Ok(chat.message.content)
    }
}

/// Summarizer that needs no model: one bullet per distinct activity line.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSummarizer;

#[async_trait]
impl LanguageModel for OfflineSummarizer {
    fn name(&self) -> String {
        "offline".to_string()
    }

    async fn complete(&self, instruction: &str, context: &str) -> Result<String, RecapError> {
        Ok(offline_summary(instruction, context))
    }
}

fn offline_summary(instruction: &str, context: &str) -> String {
    let mut out = String::new();

    if let Some(title) = instruction
        .lines()
        .find_map(|l| l.trim().strip_prefix("Title: "))
    {
        out.push_str(&format!("# {}\n\n", title.trim()));
    }

    let mut seen = HashSet::new();
    for line in context.lines().filter(|l| l.starts_with("- ")) {
        let description = line
            .split_once("): ")
            .map(|(_, d)| d)
            .unwrap_or(&line[2..])
            .trim();
        if !description.is_empty() && seen.insert(description.to_lowercase()) {
            out.push_str(&format!("- {}\n", description));
        }
    }

    out
}

/// Pick the model for a provider.
///
/// Anthropic without an API key degrades to the offline summarizer; the
/// returned note explains why.
pub fn select_model(
    config: &ModelConfig,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<(Arc<dyn LanguageModel>, Option<String>), RecapError> {
    let mut note = None;
    let model: Arc<dyn LanguageModel> = match (config.provider, api_key) {
        (Provider::Anthropic, Some(key)) => Arc::new(AnthropicModel::new(config, key, timeout)?),
        (Provider::Anthropic, None) => {
            let reason = format!(
                "{} is not set; using the offline summarizer",
                config.api_key_env
            );
            debug!("{}", reason);
            note = Some(reason);
            Arc::new(OfflineSummarizer)
        }
        (Provider::Ollama, _) => Arc::new(OllamaModel::new(config, timeout)?),
        (Provider::Offline, _) => Arc::new(OfflineSummarizer),
    };
    Ok((model, note))
}
