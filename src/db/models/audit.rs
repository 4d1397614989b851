use serde::{Deserialize, Serialize};

text_enum! {
    pub enum AuditAction {
        Created => "CREATED",
        Escalated => "ESCALATED",
        Assigned => "ASSIGNED",
        ModeChanged => "MODE_CHANGED",
        Takeover => "TAKEOVER",
        ReturnedToAi => "RETURNED_TO_AI",
        NoteAdded => "NOTE_ADDED",
        MessageSent => "MESSAGE_SENT",
        SurveySent => "SURVEY_SENT",
        SurveyAnswered => "SURVEY_ANSWERED",
        Closed => "CLOSED",
    }
}

/// A single entry in the immutable protocol audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolAudit {
    pub id: String,
    pub protocol_id: String,
    /// `None` for system-driven actions (poller, detectors).
    pub user_id: Option<String>,
    pub action: AuditAction,
    /// JSON object describing the transition.
    pub detail: Option<String>,
    pub created_at: String,
}
