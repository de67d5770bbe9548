use std::time::Duration;

use anyhow::Context;
use promptstudy_contracts::messages::Message;
use promptstudy_contracts::records::{InteractionRecord, TaskSubmission};
use promptstudy_contracts::tasks::{TaskId, TaskRecord};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::{Method, Url};
use serde_json::{json, Value};

use crate::bridge::{truncate_text, ChatTurn};
use crate::config::StudyConfig;
use crate::error::{BackendFailure, BackendResult};

pub const TASKS_PATH: &str = "/api/tasks";
pub const CHAT_PATH: &str = "/api/ai/chat";
pub const IMAGE_PATH: &str = "/api/ai/image";
pub const INTERACTION_LOG_PATH: &str = "/api/chat/message";
pub const SUBMIT_PATH: &str = "/api/tasks/submit";

/// Calls the study backend makes available to the client.
pub trait StudyBackend: Send + Sync {
    fn fetch_tasks(&self) -> BackendResult<Vec<TaskRecord>>;

    /// Proxied chat completion. Returns the raw `content` field.
    fn chat(&self, messages: &[ChatTurn], model: &str) -> BackendResult<Value>;

    /// Proxied image generation. Returns the generated image url.
    fn generate_image(&self, prompt: &str, model: &str) -> BackendResult<String>;

    fn log_interaction(&self, record: &InteractionRecord) -> BackendResult<()>;

    fn submit_task(&self, submission: &TaskSubmission) -> BackendResult<()>;

    fn fetch_conversation(
        &self,
        participant_id: &str,
        task_id: &TaskId,
    ) -> BackendResult<Vec<Message>>;
}

/// Blocking HTTP client for the study backend.
pub struct HttpBackend {
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(config: &StudyConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build backend HTTP client")?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            timeout: config.timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn call(&self, method: Method, path: &str, body: Option<Value>) -> BackendResult<Value> {
        let url = format!("{}{path}", self.base_url);
        self.call_url(method, &url, body)
    }

    fn call_url(&self, method: Method, url: &str, body: Option<Value>) -> BackendResult<Value> {
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder
            .send()
            .map_err(|err| self.transport_failure(&err))?;
        response_json_or_error(response)
    }

    fn transport_failure(&self, err: &reqwest::Error) -> BackendFailure {
        if err.is_timeout() {
            return BackendFailure::new(format!(
                "Request timed out after {}s",
                self.timeout.as_secs_f32()
            ));
        }
        if err.is_connect() {
            return BackendFailure::new(format!(
                "Could not reach the study server at {}",
                self.base_url
            ));
        }
        BackendFailure::new(format!("Request failed: {err}"))
    }

    fn conversation_url(&self, participant_id: &str, task_id: &TaskId) -> BackendResult<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| BackendFailure::new(format!("Invalid study server url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| BackendFailure::new("Invalid study server url"))?
            .pop_if_empty()
            .extend(["api", "conversations", participant_id, task_id.as_str()]);
        Ok(url.to_string())
    }
}

impl StudyBackend for HttpBackend {
    fn fetch_tasks(&self) -> BackendResult<Vec<TaskRecord>> {
        let payload = self.call(Method::GET, TASKS_PATH, None)?;
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("tasks") {
                Some(Value::Array(items)) => items,
                _ => return Err(BackendFailure::new("Task list response had no tasks")),
            },
            _ => return Err(BackendFailure::new("Task list response was not a list")),
        };
        serde_json::from_value(Value::Array(items))
            .map_err(|err| BackendFailure::new(format!("Malformed task list: {err}")))
    }

    fn chat(&self, messages: &[ChatTurn], model: &str) -> BackendResult<Value> {
        let payload = self.call(
            Method::POST,
            CHAT_PATH,
            Some(json!({ "messages": messages, "model": model })),
        )?;
        match payload.get("content") {
            Some(content) if !content.is_null() => Ok(content.clone()),
            _ => Err(BackendFailure::new("Chat response did not include content")),
        }
    }

    fn generate_image(&self, prompt: &str, model: &str) -> BackendResult<String> {
        let payload = self.call(
            Method::POST,
            IMAGE_PATH,
            Some(json!({ "prompt": prompt, "model": model })),
        )?;
        payload
            .get("image_url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendFailure::new("Image response did not include an image url"))
    }

    fn log_interaction(&self, record: &InteractionRecord) -> BackendResult<()> {
        let body = serde_json::to_value(record)
            .map_err(|err| BackendFailure::new(format!("Unserializable record: {err}")))?;
        self.call(Method::POST, INTERACTION_LOG_PATH, Some(body))?;
        Ok(())
    }

    fn submit_task(&self, submission: &TaskSubmission) -> BackendResult<()> {
        let body = serde_json::to_value(submission)
            .map_err(|err| BackendFailure::new(format!("Unserializable submission: {err}")))?;
        self.call(Method::POST, SUBMIT_PATH, Some(body))?;
        Ok(())
    }

    fn fetch_conversation(
        &self,
        participant_id: &str,
        task_id: &TaskId,
    ) -> BackendResult<Vec<Message>> {
        let url = self.conversation_url(participant_id, task_id)?;
        let payload = self.call_url(Method::GET, &url, None)?;
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("messages") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let mut messages = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Message>(item) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "skipping unreadable stored message");
                }
            }
        }
        Ok(messages)
    }
}

/// Non-2xx responses use the body's `error` field when there is one, else a
/// generic status line.
fn response_json_or_error(response: HttpResponse) -> BackendResult<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        BackendFailure::with_status(code, format!("Failed to read server response: {err}"))
    })?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("HTTP error! status: {code}"));
        return Err(BackendFailure::with_status(code, message));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|_| {
        BackendFailure::with_status(
            code,
            format!("Server returned invalid JSON: {}", truncate_text(&body, 200)),
        )
    })
}
