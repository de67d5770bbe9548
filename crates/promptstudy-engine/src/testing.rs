//! In-memory stand-ins for the backend and the AI bridge.

use std::sync::Mutex;

use anyhow::bail;
use promptstudy_contracts::messages::Message;
use promptstudy_contracts::records::{InteractionRecord, TaskSubmission};
use promptstudy_contracts::tasks::{TaskId, TaskRecord};
use serde_json::{json, Value};

use crate::backend::StudyBackend;
use crate::bridge::{AiBridge, ChatOptions, ChatTurn};
use crate::error::{BackendFailure, BackendResult};

pub(crate) struct FakeBridge {
    ready: bool,
    chat_reply: Value,
    image_reply: Value,
    failure: Option<String>,
    chats: Mutex<Vec<(Vec<ChatTurn>, ChatOptions)>>,
    images: Mutex<Vec<(String, String)>>,
}

impl FakeBridge {
    pub(crate) fn ready() -> Self {
        Self {
            ready: true,
            chat_reply: json!("bridge reply"),
            image_reply: json!({"src": "https://img.example/bridge.png"}),
            failure: None,
            chats: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::ready()
        }
    }

    pub(crate) fn with_chat_reply(mut self, reply: Value) -> Self {
        self.chat_reply = reply;
        self
    }

    pub(crate) fn with_image_reply(mut self, reply: Value) -> Self {
        self.image_reply = reply;
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub(crate) fn chat_calls(&self) -> Vec<(Vec<ChatTurn>, ChatOptions)> {
        self.chats.lock().unwrap().clone()
    }

    pub(crate) fn image_calls(&self) -> Vec<(String, String)> {
        self.images.lock().unwrap().clone()
    }

    pub(crate) fn image_call_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }
}

impl AiBridge for FakeBridge {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn chat(&self, messages: &[ChatTurn], options: &ChatOptions) -> anyhow::Result<Value> {
        self.chats
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(self.chat_reply.clone())
    }

    fn generate_image(&self, prompt: &str, model: &str) -> anyhow::Result<Value> {
        self.images
            .lock()
            .unwrap()
            .push((prompt.to_string(), model.to_string()));
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(self.image_reply.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    tasks: Option<BackendResult<Vec<TaskRecord>>>,
    chat_reply: Option<BackendResult<Value>>,
    image_reply: Option<BackendResult<String>>,
    conversation: Option<BackendResult<Vec<Message>>>,
    log_failure: Option<String>,
    submit_failure: Mutex<Option<String>>,
    calls: Mutex<Vec<&'static str>>,
    image_models: Mutex<Vec<String>>,
    logged: Mutex<Vec<InteractionRecord>>,
    submissions: Mutex<Vec<TaskSubmission>>,
}

impl FakeBackend {
    pub(crate) fn with_tasks(mut self, tasks: BackendResult<Vec<TaskRecord>>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub(crate) fn with_chat_reply(mut self, reply: BackendResult<Value>) -> Self {
        self.chat_reply = Some(reply);
        self
    }

    pub(crate) fn with_image_reply(mut self, reply: BackendResult<String>) -> Self {
        self.image_reply = Some(reply);
        self
    }

    pub(crate) fn with_conversation(mut self, messages: BackendResult<Vec<Message>>) -> Self {
        self.conversation = Some(messages);
        self
    }

    pub(crate) fn failing_logs(mut self, message: &str) -> Self {
        self.log_failure = Some(message.to_string());
        self
    }

    pub(crate) fn set_submit_failure(&self, message: Option<&str>) {
        *self.submit_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| **call == endpoint)
            .count()
    }

    pub(crate) fn image_models(&self) -> Vec<String> {
        self.image_models.lock().unwrap().clone()
    }

    pub(crate) fn logged(&self) -> Vec<InteractionRecord> {
        self.logged.lock().unwrap().clone()
    }

    pub(crate) fn submissions(&self) -> Vec<TaskSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    fn record_call(&self, endpoint: &'static str) {
        self.calls.lock().unwrap().push(endpoint);
    }
}

impl StudyBackend for FakeBackend {
    fn fetch_tasks(&self) -> BackendResult<Vec<TaskRecord>> {
        self.record_call("fetch_tasks");
        self.tasks.clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn chat(&self, _messages: &[ChatTurn], _model: &str) -> BackendResult<Value> {
        self.record_call("chat");
        self.chat_reply
            .clone()
            .unwrap_or_else(|| Ok(json!("proxied reply")))
    }

    fn generate_image(&self, _prompt: &str, model: &str) -> BackendResult<String> {
        self.record_call("generate_image");
        self.image_models.lock().unwrap().push(model.to_string());
        self.image_reply
            .clone()
            .unwrap_or_else(|| Ok("https://img.example/proxied.png".to_string()))
    }

    fn log_interaction(&self, record: &InteractionRecord) -> BackendResult<()> {
        self.record_call("log_interaction");
        if let Some(message) = &self.log_failure {
            return Err(BackendFailure::new(message.clone()));
        }
        self.logged.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn submit_task(&self, submission: &TaskSubmission) -> BackendResult<()> {
        self.record_call("submit_task");
        if let Some(message) = self.submit_failure.lock().unwrap().clone() {
            return Err(BackendFailure::new(message));
        }
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(())
    }

    fn fetch_conversation(
        &self,
        _participant_id: &str,
        _task_id: &TaskId,
    ) -> BackendResult<Vec<Message>> {
        self.record_call("fetch_conversation");
        self.conversation.clone().unwrap_or_else(|| Ok(Vec::new()))
    }
}
