use std::time::Duration;

use anyhow::{bail, Context, Result};
use promptstudy_contracts::messages::{Message, Sender};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::non_empty_env;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const IMAGE_SIZE: &str = "1024x1024";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Prior conversation as model turns. Error replies are dropped so a
    /// failed exchange never gets replayed to the model.
    pub fn from_history(history: &[Message]) -> Vec<Self> {
        history
            .iter()
            .filter(|message| !message.is_error && message.notice.is_none())
            .map(|message| match message.sender {
                Sender::User => Self::user(message.content.clone()),
                Sender::Ai => Self::assistant(message.content.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatOptions {
    pub fn for_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// In-process AI client. Replies are returned raw; callers normalize them.
pub trait AiBridge: Send + Sync {
    fn is_ready(&self) -> bool;
    fn chat(&self, messages: &[ChatTurn], options: &ChatOptions) -> Result<Value>;
    fn generate_image(&self, prompt: &str, model: &str) -> Result<Value>;
}

/// Bridge used when no in-process client is configured. Never ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBridge;

impl AiBridge for UnavailableBridge {
    fn is_ready(&self) -> bool {
        false
    }

    fn chat(&self, _messages: &[ChatTurn], _options: &ChatOptions) -> Result<Value> {
        bail!("no AI bridge is configured")
    }

    fn generate_image(&self, _prompt: &str, _model: &str) -> Result<Value> {
        bail!("no AI bridge is configured")
    }
}

/// OpenAI-compatible bridge. Ready once an API key is present.
pub struct OpenAiBridge {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl OpenAiBridge {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            api_base: non_empty_env("OPENAI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            api_key: non_empty_env("OPENAI_API_KEY"),
            http,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("OPENAI_API_KEY is not set")
    }
}

impl AiBridge for OpenAiBridge {
    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }

    fn chat(&self, messages: &[ChatTurn], options: &ChatOptions) -> Result<Value> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.api_key()?)
            .json(&payload)
            .send()
            .with_context(|| format!("chat request to {endpoint} failed"))?;
        response_json_or_error(response)
    }

    fn generate_image(&self, prompt: &str, model: &str) -> Result<Value> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": IMAGE_SIZE,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.api_key()?)
            .json(&payload)
            .send()
            .with_context(|| format!("image request to {endpoint} failed"))?;
        let mut parsed = response_json_or_error(response)?;
        // Base64-only replies become data urls so they render like hosted ones.
        if let Some(first) = parsed
            .get_mut("data")
            .and_then(Value::as_array_mut)
            .and_then(|items| items.first_mut())
            .and_then(Value::as_object_mut)
        {
            if !first.contains_key("url") {
                if let Some(encoded) = first.get("b64_json").and_then(Value::as_str) {
                    let url = format!("data:image/png;base64,{encoded}");
                    first.insert("url".to_string(), Value::String(url));
                }
            }
        }
        Ok(parsed)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().context("response body read failed")?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .or_else(|| value.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| truncate_text(&body, 512));
        bail!("request failed ({code}): {detail}");
    }
    serde_json::from_str(&body).context("returned invalid JSON payload")
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
