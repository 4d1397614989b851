use serde::{Deserialize, Serialize};

text_enum! {
    /// Lifecycle status. `Closed` is terminal.
    pub enum ProtocolStatus {
        Active => "ACTIVE",
        Escalated => "ESCALATED",
        InProgress => "IN_PROGRESS",
        Closed => "CLOSED",
    }
}

text_enum! {
    /// Who answers the contact. Orthogonal to status.
    pub enum AttendanceMode {
        AiOnly => "AI_ONLY",
        /// Human injects context that the AI uses on its next turn.
        HumanAssisted => "HUMAN_ASSISTED",
        /// Human responds directly; the AI is disengaged.
        HumanTakeover => "HUMAN_TAKEOVER",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    /// `PREFIX-YYYY-NNNNNN`
    pub number: String,
    pub instance_id: String,
    pub session_id: String,
    pub contact_id: String,
    pub contact_name: Option<String>,
    pub channel: String,
    pub status: ProtocolStatus,
    pub mode: AttendanceMode,
    pub escalation_reason: Option<String>,
    pub escalated_at: Option<String>,
    pub escalation_count: i64,
    pub assigned_user_id: Option<String>,
    pub assigned_at: Option<String>,
    pub closed_by: Option<String>,
    pub closed_at: Option<String>,
    pub close_reason: Option<String>,
    pub close_result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Protocol {
    /// A human owns (or owned) this protocol; AI-driven detectors must keep out.
    pub fn is_human_owned(&self) -> bool {
        matches!(self.status, ProtocolStatus::Closed | ProtocolStatus::InProgress)
            || self.assigned_user_id.is_some()
    }

    pub fn was_escalated(&self) -> bool {
        self.escalation_reason
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Identity of the conversation a protocol is opened for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRef {
    pub instance_id: String,
    pub session_id: String,
    pub contact_id: String,
    pub channel: String,
    pub contact_name: Option<String>,
}
