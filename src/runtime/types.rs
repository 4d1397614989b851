use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live conversation as listed by the AI runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub origin: Option<SessionOrigin>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub last_channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOrigin {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl SessionSummary {
    /// Contact identity: the explicit `from` of the origin when present,
    /// otherwise the normalized session key, otherwise the session id.
    pub fn contact_id(&self) -> String {
        if let Some(from) = self
            .origin
            .as_ref()
            .and_then(|o| o.from.as_deref())
            .map(str::trim)
            .filter(|f| !f.is_empty())
        {
            return from.to_string();
        }
        normalize_session_key(&self.key).unwrap_or_else(|| self.session_id.clone())
    }

    pub fn contact_name(&self) -> Option<String> {
        self.origin
            .as_ref()
            .and_then(|o| o.label.as_deref())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
    }
}

/// Session keys are scoped like `agent:<agent>:<channel>:<peer>`; the peer
/// is the last segment.
pub fn normalize_session_key(key: &str) -> Option<String> {
    key.rsplit(':')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    #[serde(other)]
    Other,
}

/// A typed block of structured message content. Only `text` blocks carry
/// meaning for signal detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Message content is either a plain string or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Plain text as-is; for blocks, the `text` blocks joined by newlines.
    pub fn flatten(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

impl ConversationTurn {
    pub fn text(&self) -> String {
        self.content.flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_summary_parses_runtime_payload() {
        let json = r#"{
            "sessionId": "s-1",
            "updatedAt": 1767261600000,
            "origin": {"from": "+5511999990000", "label": "Maria"},
            "key": "agent:main:whatsapp:+5511999990000",
            "lastChannel": "whatsapp"
        }"#;
        let s: SessionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(s.session_id, "s-1");
        assert_eq!(s.updated_at.timestamp_millis(), 1_767_261_600_000);
        assert_eq!(s.contact_id(), "+5511999990000");
        assert_eq!(s.contact_name().as_deref(), Some("Maria"));
        assert_eq!(s.last_channel.as_deref(), Some("whatsapp"));
    }

    #[test]
    fn test_contact_falls_back_to_normalized_key() {
        let json = r#"{"sessionId": "s-2", "updatedAt": 0, "key": "agent:main:telegram:JoaoS"}"#;
        let s: SessionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(s.contact_id(), "joaos");
        assert!(s.contact_name().is_none());
    }

    #[test]
    fn test_contact_falls_back_to_session_id() {
        let json = r#"{"sessionId": "s-3", "updatedAt": 0, "origin": {"from": "  "}}"#;
        let s: SessionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(s.contact_id(), "s-3");
    }

    #[test]
    fn test_content_flattening() {
        let plain: ConversationTurn =
            serde_json::from_str(r#"{"role": "user", "content": "oi"}"#).unwrap();
        assert_eq!(plain.text(), "oi");

        let blocks: ConversationTurn = serde_json::from_str(
            r#"{"role": "assistant", "content": [
                {"type": "text", "text": "primeira"},
                {"type": "tool_use", "name": "lookup"},
                {"type": "text", "text": "segunda"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(blocks.role, Role::Assistant);
        assert_eq!(blocks.text(), "primeira\nsegunda");
    }

    #[test]
    fn test_unknown_role_is_tolerated() {
        let turn: ConversationTurn =
            serde_json::from_str(r#"{"role": "tool", "content": "x"}"#).unwrap();
        assert_eq!(turn.role, Role::Other);
    }
}
