use std::sync::Arc;

use promptstudy_contracts::messages::{Message, MessageType, NoticeKind};
use promptstudy_contracts::models::{ProviderSpec, Transport};
use promptstudy_contracts::normalize::{extract_image_source, normalize_response, ResponseShape};
use promptstudy_contracts::prompt::build_image_prompt;
use promptstudy_contracts::tasks::TaskId;

use crate::backend::StudyBackend;
use crate::bridge::{AiBridge, ChatOptions, ChatTurn};
use crate::error::DispatchError;

/// One send, bound to its task and provider when it was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub task_id: TaskId,
    pub provider: ProviderSpec,
    pub message_type: MessageType,
    pub content: String,
    /// Task history before this request's user message.
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub content: String,
    pub message_type: MessageType,
    pub notice: Option<NoticeKind>,
    /// Set only when an image was actually produced; drives the quota.
    pub generated_image: bool,
    pub shape: Option<ResponseShape>,
}

impl DispatchReply {
    fn text(content: String, shape: Option<ResponseShape>) -> Self {
        Self {
            content,
            message_type: MessageType::Text,
            notice: None,
            generated_image: false,
            shape,
        }
    }

    fn image(source: String) -> Self {
        Self {
            content: source,
            message_type: MessageType::Image,
            notice: None,
            generated_image: true,
            shape: None,
        }
    }

    fn capability_mismatch(provider: &ProviderSpec) -> Self {
        Self {
            content: format!(
                "{} can't generate images. Switch to a provider that supports image generation, or send your request as a text message.",
                provider.name
            ),
            message_type: MessageType::Text,
            notice: Some(NoticeKind::CapabilityMismatch),
            generated_image: false,
            shape: None,
        }
    }
}

/// Routes a turn to the bridge or the backend proxy, as the provider's
/// transport dictates, and normalizes what comes back.
pub struct ProviderDispatcher {
    bridge: Arc<dyn AiBridge>,
    backend: Arc<dyn StudyBackend>,
}

impl ProviderDispatcher {
    pub fn new(bridge: Arc<dyn AiBridge>, backend: Arc<dyn StudyBackend>) -> Self {
        Self { bridge, backend }
    }

    pub fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReply, DispatchError> {
        self.send(
            &request.provider,
            request.message_type,
            &request.content,
            &request.history,
        )
    }

    pub fn send(
        &self,
        provider: &ProviderSpec,
        message_type: MessageType,
        content: &str,
        history: &[Message],
    ) -> Result<DispatchReply, DispatchError> {
        if message_type == MessageType::Image && !provider.supports_images() {
            tracing::debug!(provider = %provider.name, "image request to text-only provider");
            return Ok(DispatchReply::capability_mismatch(provider));
        }

        match message_type {
            MessageType::Text => self.send_text(provider, content, history),
            MessageType::Image => {
                let prompt = build_image_prompt(content, history);
                self.send_image(provider, &prompt)
            }
        }
    }

    fn send_text(
        &self,
        provider: &ProviderSpec,
        content: &str,
        history: &[Message],
    ) -> Result<DispatchReply, DispatchError> {
        let mut turns = ChatTurn::from_history(history);
        turns.push(ChatTurn::user(content));

        let raw = match provider.transport {
            Transport::Bridge => {
                self.ensure_bridge_ready()?;
                self.bridge
                    .chat(&turns, &ChatOptions::for_model(&provider.model))
                    .map_err(|err| DispatchError::bridge_failed(format!("{err:#}")))?
            }
            Transport::BackendProxy => self.backend.chat(&turns, &provider.model)?,
        };
        let normalized = normalize_response(&raw);
        if normalized.shape.is_none() {
            tracing::debug!(provider = %provider.name, "unrecognized reply shape; showing raw payload");
        }
        Ok(DispatchReply::text(normalized.text, normalized.shape))
    }

    fn send_image(
        &self,
        provider: &ProviderSpec,
        prompt: &str,
    ) -> Result<DispatchReply, DispatchError> {
        let model = provider.image_model();
        let source = match provider.transport {
            Transport::Bridge => {
                self.ensure_bridge_ready()?;
                let raw = self
                    .bridge
                    .generate_image(prompt, model)
                    .map_err(|err| DispatchError::bridge_failed(format!("{err:#}")))?;
                extract_image_source(&raw)
            }
            Transport::BackendProxy => self.backend.generate_image(prompt, model)?,
        };
        Ok(DispatchReply::image(source))
    }

    fn ensure_bridge_ready(&self) -> Result<(), DispatchError> {
        if self.bridge.is_ready() {
            Ok(())
        } else {
            Err(DispatchError::BridgeNotReady)
        }
    }
}
