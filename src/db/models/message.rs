use serde::{Deserialize, Serialize};

text_enum! {
    pub enum MessageKind {
        /// Internal note, never shown to the contact.
        Note => "NOTE",
        DirectMessage => "DIRECT_MESSAGE",
        System => "SYSTEM",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub id: String,
    pub protocol_id: String,
    pub user_id: Option<String>,
    pub kind: MessageKind,
    pub content: String,
    pub metadata: Option<String>,
    pub created_at: String,
}
