use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use promptstudy_contracts::conversation::{ConversationStore, TaskThread};
use promptstudy_contracts::events::{EventKind, EventPayload};
use promptstudy_contracts::messages::{Message, MessageClock, MessageType, Notice, NoticeKind};
use promptstudy_contracts::models::{ProviderCatalog, ProviderSelection, ProviderSelector, ProviderSpec};
use promptstudy_contracts::quota::QuotaTracker;
use promptstudy_contracts::records::{InteractionRecord, TaskSubmission};
use promptstudy_contracts::submissions::SubmittedTaskSet;
use promptstudy_contracts::tasks::{Task, TaskId};
use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::StudyBackend;
use crate::detached::{Detached, SideCallFailure, SideCallKind};
use crate::dispatcher::{DispatchReply, DispatchRequest, ProviderDispatcher};
use crate::error::DispatchError;
use crate::session::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
}

/// Why a send never reached the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendRejection {
    #[error("no task is selected")]
    NoActiveTask,
    #[error("message is empty")]
    EmptyInput,
    #[error("still waiting for the previous reply on this task")]
    AlreadySending,
    #[error("image generation limit reached for this task ({count}/{ceiling})")]
    QuotaExceeded { count: u32, ceiling: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Already marked complete; no call was made.
    AlreadySubmitted,
    Failed { message: String },
}

/// A send that has been issued but not yet resolved. Carries the task and
/// provider it was issued for, so the reply lands there no matter what is
/// selected when it comes back.
#[derive(Debug, Clone)]
pub struct PendingSend {
    dispatch_id: u64,
    request: DispatchRequest,
    user_message: Message,
}

impl PendingSend {
    pub fn request(&self) -> &DispatchRequest {
        &self.request
    }

    pub fn task_id(&self) -> &TaskId {
        &self.request.task_id
    }

    pub fn user_message(&self) -> &Message {
        &self.user_message
    }
}

/// Owns all mutable study state and drives the per-task Idle/Sending cycle.
///
/// Sending is split in two so the network call can run anywhere:
/// [`SessionController::begin_send`] records the user turn and hands back a
/// [`PendingSend`]; the caller dispatches it and feeds the result to
/// [`SessionController::complete_send`]. [`SessionController::send_message`]
/// does all three in one go.
pub struct SessionController {
    session: SessionContext,
    backend: Arc<dyn StudyBackend>,
    selector: ProviderSelector,
    provider: ProviderSpec,
    conversations: ConversationStore,
    quota: QuotaTracker,
    submitted: SubmittedTaskSet,
    clock: MessageClock,
    in_flight: HashMap<TaskId, u64>,
    next_dispatch_id: u64,
    draft: String,
    mode: MessageType,
    side_calls: Detached,
}

impl SessionController {
    pub fn new(
        session: SessionContext,
        backend: Arc<dyn StudyBackend>,
        side_calls: Detached,
    ) -> Self {
        Self::with_catalog(session, backend, side_calls, ProviderCatalog::default())
    }

    pub fn with_catalog(
        session: SessionContext,
        backend: Arc<dyn StudyBackend>,
        side_calls: Detached,
        catalog: ProviderCatalog,
    ) -> Self {
        let selector = ProviderSelector::new(Some(catalog));
        let provider = selector.select(None).provider;
        let quota = session.quota_tracker();
        let submitted = session.submitted_tasks();
        Self {
            session,
            backend,
            selector,
            provider,
            conversations: ConversationStore::new(),
            quota,
            submitted,
            clock: MessageClock::new(),
            in_flight: HashMap::new(),
            next_dispatch_id: 1,
            draft: String::new(),
            mode: MessageType::Text,
            side_calls,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.selector.catalog
    }

    /// Seeds the task list from the backend. A failed fetch leaves the list
    /// empty and is only logged.
    pub fn load_tasks(&mut self) -> usize {
        let records = match self.backend.fetch_tasks() {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load tasks");
                self.emit(
                    EventKind::TasksLoaded,
                    json!({ "count": 0, "error": err.message }),
                );
                return self.conversations.threads().len();
            }
        };
        let tasks: Vec<Task> = records.into_iter().map(Task::from).collect();
        let count = self.conversations.seed(tasks);
        self.reset_interim_state();
        self.emit(EventKind::TasksLoaded, json!({ "count": count }));
        count
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.conversations.tasks()
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn thread(&self, task_id: &TaskId) -> Option<&TaskThread> {
        self.conversations.thread(task_id)
    }

    pub fn active_task(&self) -> Option<&TaskThread> {
        self.conversations.active_task()
    }

    /// Switching never touches other threads; it resets the draft and the
    /// message mode to the new task's defaults.
    pub fn select_task(&mut self, task_id: &TaskId) -> Result<&TaskThread> {
        self.conversations.select_task(task_id)?;
        self.reset_interim_state();
        self.emit(EventKind::TaskSelected, json!({ "task_id": task_id }));
        self.conversations
            .thread(task_id)
            .ok_or_else(|| anyhow!("unknown task '{task_id}'"))
    }

    pub fn provider(&self) -> &ProviderSpec {
        &self.provider
    }

    pub fn select_provider(&mut self, name: &str) -> ProviderSelection {
        let selection = self.selector.select(Some(name));
        if let Some(reason) = &selection.fallback_reason {
            tracing::info!(requested = name, "{reason}");
        }
        self.provider = selection.provider.clone();
        self.emit(
            EventKind::ProviderSelected,
            json!({
                "provider": self.provider.name,
                "transport": self.provider.transport.to_string(),
                "fallback": selection.fallback_reason.is_some(),
            }),
        );
        selection
    }

    pub fn mode(&self) -> MessageType {
        self.mode
    }

    /// Image mode only exists on image tasks.
    pub fn set_mode(&mut self, mode: MessageType) -> Result<()> {
        if mode == MessageType::Image
            && !self
                .conversations
                .active_task()
                .is_some_and(|thread| thread.task.is_image_task())
        {
            bail!("image mode is only available on image tasks");
        }
        self.mode = mode;
        Ok(())
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
    }

    pub fn state(&self, task_id: &TaskId) -> SendState {
        if self.in_flight.contains_key(task_id) {
            SendState::Sending
        } else {
            SendState::Idle
        }
    }

    /// Tasks whose reply has not been applied yet.
    pub fn sends_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the send control should be enabled for the active task.
    pub fn can_send(&self) -> bool {
        match self.conversations.active_task_id() {
            Some(task_id) => {
                self.state(task_id) == SendState::Idle && !self.draft.trim().is_empty()
            }
            None => false,
        }
    }

    pub fn quota_count(&mut self, task_id: &TaskId) -> u32 {
        self.quota.current_count(task_id)
    }

    pub fn quota_remaining(&mut self, task_id: &TaskId) -> u32 {
        self.quota.remaining(task_id)
    }

    pub fn is_submitted(&self, task_id: &TaskId) -> bool {
        self.submitted.contains(task_id)
    }

    pub fn submitted_tasks(&self) -> &SubmittedTaskSet {
        &self.submitted
    }

    /// Sends the current draft. The draft is cleared once the send is issued.
    pub fn begin_send_draft(&mut self) -> Result<PendingSend, SendRejection> {
        let draft = self.draft.clone();
        let pending = self.begin_send(&draft)?;
        self.draft.clear();
        Ok(pending)
    }

    /// Idle -> Sending. Appends the user turn and binds the request to the
    /// active task and provider.
    pub fn begin_send(&mut self, input: &str) -> Result<PendingSend, SendRejection> {
        let content = input.trim();
        if content.is_empty() {
            return Err(SendRejection::EmptyInput);
        }
        let Some(thread) = self.conversations.active_task() else {
            return Err(SendRejection::NoActiveTask);
        };
        let task = thread.task.clone();
        if self.state(&task.id) == SendState::Sending {
            return Err(SendRejection::AlreadySending);
        }

        let message_type = self.mode;
        if message_type == MessageType::Image && self.quota.is_exceeded(&task) {
            return Err(self.reject_for_quota(&task));
        }

        let history = self.conversations.history(&task.id);
        let user_message = Message::user(self.clock.next_id(), content, message_type);
        if let Err(err) = self
            .conversations
            .append_message(&task.id, user_message.clone())
        {
            tracing::error!(task_id = %task.id, error = %err, "active task missing from store");
            return Err(SendRejection::NoActiveTask);
        }

        let dispatch_id = self.next_dispatch_id;
        self.next_dispatch_id += 1;
        self.in_flight.insert(task.id.clone(), dispatch_id);
        self.emit(
            EventKind::MessageSent,
            json!({
                "task_id": task.id,
                "provider": self.provider.name,
                "message_type": message_type.as_str(),
            }),
        );

        Ok(PendingSend {
            dispatch_id,
            request: DispatchRequest {
                task_id: task.id,
                provider: self.provider.clone(),
                message_type,
                content: content.to_string(),
                history,
            },
            user_message,
        })
    }

    /// Sending -> Idle. Appends the reply or error to the task the send was
    /// issued for and returns the appended message.
    pub fn complete_send(
        &mut self,
        pending: PendingSend,
        result: Result<DispatchReply, DispatchError>,
    ) -> Message {
        let PendingSend {
            dispatch_id,
            request,
            user_message,
        } = pending;
        let task_id = request.task_id;
        let provider = request.provider;

        if self.in_flight.get(&task_id) == Some(&dispatch_id) {
            self.in_flight.remove(&task_id);
        } else {
            tracing::warn!(task_id = %task_id, dispatch_id, "completion for a send that is no longer tracked");
        }

        let reply = match result {
            Ok(reply) => {
                let mut message = Message::ai(
                    self.clock.next_id(),
                    reply.content,
                    reply.message_type,
                    &provider.name,
                );
                message.notice = reply.notice;
                if reply.generated_image {
                    let generation_id = user_message.id.to_string();
                    match self.quota.increment(&task_id, &generation_id) {
                        Ok(count) => {
                            tracing::debug!(task_id = %task_id, count, "image generation counted")
                        }
                        Err(err) => {
                            tracing::warn!(task_id = %task_id, error = %err, "failed to persist image quota")
                        }
                    }
                }
                self.emit(
                    EventKind::ReplyReceived,
                    json!({
                        "task_id": task_id,
                        "provider": provider.name,
                        "message_type": message.message_type.as_str(),
                        "notice": reply.notice,
                    }),
                );
                message
            }
            Err(err) => {
                self.emit(
                    EventKind::DispatchFailed,
                    json!({
                        "task_id": task_id,
                        "provider": provider.name,
                        "kind": err.kind(),
                        "message": err.to_string(),
                    }),
                );
                Message::ai_error(self.clock.next_id(), &err.to_string(), &provider.name)
            }
        };

        if let Err(err) = self.conversations.append_message(&task_id, reply.clone()) {
            tracing::error!(task_id = %task_id, error = %err, "reply for unknown task dropped");
            return reply;
        }

        let record = InteractionRecord::from_exchange(
            self.session.participant_id(),
            &task_id,
            &provider.name,
            request.message_type,
            &user_message,
            &reply,
        );
        self.log_interaction(record);
        reply
    }

    /// Begin, dispatch and complete on the calling thread.
    pub fn send_message(
        &mut self,
        dispatcher: &ProviderDispatcher,
        input: &str,
    ) -> Result<Message, SendRejection> {
        let pending = self.begin_send(input)?;
        let result = dispatcher.dispatch(pending.request());
        Ok(self.complete_send(pending, result))
    }

    /// Marks a task complete. Each task is submitted at most once; a failed
    /// call leaves it unsubmitted.
    pub fn submit_task(&mut self, task_id: &TaskId) -> SubmitOutcome {
        if self.submitted.contains(task_id) {
            return SubmitOutcome::AlreadySubmitted;
        }
        let submission = TaskSubmission {
            participant_id: self.session.participant_id().to_string(),
            task_id: task_id.clone(),
        };
        if let Err(err) = self.backend.submit_task(&submission) {
            self.side_calls.report(SideCallFailure {
                kind: SideCallKind::Submission,
                message: err.message.clone(),
            });
            self.emit(
                EventKind::SideCallFailed,
                json!({ "kind": "submission", "task_id": task_id, "message": &err.message }),
            );
            return SubmitOutcome::Failed {
                message: err.message,
            };
        }
        if let Err(err) = self.submitted.insert(task_id.clone()) {
            tracing::warn!(task_id = %task_id, error = %err, "failed to persist submitted task");
        }
        self.emit(EventKind::TaskSubmitted, json!({ "task_id": task_id }));
        SubmitOutcome::Submitted
    }

    pub fn submit_active_task(&mut self) -> Option<SubmitOutcome> {
        let task_id = self.conversations.active_task_id()?.clone();
        Some(self.submit_task(&task_id))
    }

    /// Pulls a task's logged conversation from the backend into an empty
    /// thread. Returns how many messages were restored.
    pub fn restore_conversation(&mut self, task_id: &TaskId) -> usize {
        if self
            .conversations
            .thread(task_id)
            .map_or(true, |thread| !thread.messages.is_empty())
        {
            return 0;
        }
        let messages = match self
            .backend
            .fetch_conversation(self.session.participant_id(), task_id)
        {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "failed to restore conversation");
                return 0;
            }
        };
        let messages: Vec<Message> = messages
            .into_iter()
            .map(|mut message| {
                message.id = self.clock.next_id();
                message
            })
            .collect();
        let count = messages.len();
        if count > 0 && self.conversations.restore(task_id, messages) {
            count
        } else {
            0
        }
    }

    pub fn side_call_failures(&self) -> Vec<SideCallFailure> {
        self.side_calls.drain_failures()
    }

    pub fn wait_for_side_calls(&mut self) {
        self.side_calls.join_all();
    }

    /// Waits for outstanding side calls, then closes the session.
    pub fn end_session(mut self) -> Result<()> {
        self.side_calls.join_all();
        self.session.end()
    }

    fn reject_for_quota(&mut self, task: &Task) -> SendRejection {
        let count = self.quota.current_count(&task.id);
        let ceiling = self.quota.ceiling();
        let notice = Notice::new(
            NoticeKind::QuotaExceeded,
            format!(
                "You've used all {ceiling} image generations for this task. You can keep chatting in text, or move on to another task."
            ),
        );
        if let Err(err) = self.conversations.push_notice(&task.id, notice) {
            tracing::warn!(task_id = %task.id, error = %err, "failed to attach quota notice");
        }
        self.emit(
            EventKind::QuotaRejected,
            json!({ "task_id": task.id, "count": count, "ceiling": ceiling }),
        );
        SendRejection::QuotaExceeded { count, ceiling }
    }

    fn log_interaction(&mut self, record: InteractionRecord) {
        let backend = Arc::clone(&self.backend);
        let events = self.session.events().clone();
        let task_id = record.task_id.clone();
        self.side_calls.spawn(SideCallKind::Logging, move || {
            if let Err(err) = backend.log_interaction(&record) {
                events.record(
                    EventKind::SideCallFailed,
                    payload(json!({ "kind": "logging", "task_id": task_id, "message": &err.message })),
                );
                return Err(err.into());
            }
            Ok(())
        });
    }

    fn reset_interim_state(&mut self) {
        self.draft.clear();
        self.mode = match self.conversations.active_task() {
            Some(thread) if thread.task.is_image_task() => MessageType::Image,
            _ => MessageType::Text,
        };
    }

    fn emit(&self, kind: EventKind, fields: Value) {
        self.session.events().record(kind, payload(fields));
    }
}

fn payload(fields: Value) -> EventPayload {
    match fields {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
