use serde::{Deserialize, Serialize};

/// AI context paired with the human resolution of an escalated protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPacket {
    pub id: String,
    pub protocol_id: String,
    pub instance_id: String,
    pub escalation_reason: String,
    pub ai_context: String,
    pub human_response: String,
    pub resolution: Option<String>,
    pub tags: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLearningPacket {
    pub protocol_id: String,
    pub instance_id: String,
    pub escalation_reason: String,
    pub ai_context: String,
    pub human_response: String,
    pub resolution: Option<String>,
    pub tags: Vec<String>,
}
