//! Prompt construction.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use ghsum_core::domain::{ActivityPayload, GenerateError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

pub fn system_message(system_prompt: &str, language: Option<&str>) -> ChatMessage {
    match language.map(str::trim).filter(|l| !l.is_empty()) {
        Some(language) => ChatMessage::system(format!(
            "{}\n\nWrite the summary in {language}.",
            system_prompt.trim_end()
        )),
        None => ChatMessage::system(system_prompt.trim_end()),
    }
}

fn local(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}

pub fn user_message(payload: &ActivityPayload, tz: Tz) -> Result<ChatMessage, GenerateError> {
    let json = serde_json::to_string_pretty(payload)
        .map_err(|e| GenerateError::Provider(format!("payload serialization failed: {e}")))?;
    Ok(ChatMessage::user(format!(
        "Repository: {}\nActivity window: {} to {}\n\n```json\n{json}\n```",
        payload.repo,
        local(payload.window.start, tz),
        local(payload.window.end, tz),
    )))
}

pub fn build_messages(
    system_prompt: &str,
    language: Option<&str>,
    tz: Tz,
    payload: &ActivityPayload,
) -> Result<Vec<ChatMessage>, GenerateError> {
    Ok(vec![
        system_message(system_prompt, language),
        user_message(payload, tz)?,
    ])
}
