use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatisfactionSurvey {
    pub id: String,
    pub protocol_id: String,
    pub sent_by: Option<String>,
    pub sent_at: String,
    /// 1..=5 once answered.
    pub rating: Option<i64>,
    pub comment: Option<String>,
    pub answered_at: Option<String>,
}

/// An unanswered survey joined with what the sweep needs to read the
/// contact's transcript.
#[derive(Debug, Clone)]
pub struct PendingSurvey {
    pub survey_id: String,
    pub protocol_id: String,
    pub instance_id: String,
    pub session_id: String,
    pub sent_at: String,
    pub container_host: Option<String>,
    pub container_name: Option<String>,
}
