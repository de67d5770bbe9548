use crate::messages::{Message, MessageType};

pub const IMAGE_PROMPT_MAX_CHARS: usize = 500;
const PRIOR_IMAGE_REQUESTS: usize = 3;
const PRIOR_TEXT_CONTEXT: usize = 2;
const ELLIPSIS: &str = "...";

/// Builds the prompt sent to an image model from the new request and the
/// task's earlier user turns. `history` must not contain the new request.
pub fn build_image_prompt(request: &str, history: &[Message]) -> String {
    let earlier_images = last_user_contents(history, MessageType::Image, PRIOR_IMAGE_REQUESTS);
    let context = last_user_contents(history, MessageType::Text, PRIOR_TEXT_CONTEXT);

    let mut prompt = String::new();
    if !earlier_images.is_empty() {
        prompt.push_str("Building on earlier images of: ");
        prompt.push_str(&earlier_images.join("; "));
        prompt.push_str(". ");
    }
    prompt.push_str(request.trim());
    if !context.is_empty() {
        prompt.push_str(" Context: ");
        prompt.push_str(&context.join(" | "));
    }
    truncate_prompt(&prompt, IMAGE_PROMPT_MAX_CHARS)
}

/// Caps `text` at `max_chars` characters, ending in `...` when cut.
pub fn truncate_prompt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    text.chars().take(keep).collect::<String>() + ELLIPSIS
}

fn last_user_contents(history: &[Message], message_type: MessageType, limit: usize) -> Vec<String> {
    let mut picked: Vec<String> = history
        .iter()
        .rev()
        .filter(|message| message.is_from_user() && message.message_type == message_type)
        .map(|message| message.content.trim().to_string())
        .filter(|content| !content.is_empty())
        .take(limit)
        .collect();
    picked.reverse();
    picked
}
