//! Protocol lifecycle: the only writer of protocol, audit, message, survey,
//! and learning rows.
//!
//! ```text
//! ACTIVE ──escalate──▶ ESCALATED ──assign──▶ IN_PROGRESS ──close──▶ CLOSED
//!   ▲                                            │
//!   └──────────── change_mode(AI_ONLY) ──────────┘
//! ```
//!
//! Every operation runs in one IMMEDIATE transaction holding the guard
//! check, the mutation, and exactly one audit entry. Overlapping poll cycles
//! therefore serialize on the database instead of racing.

use std::sync::Arc;

use chrono::Datelike;
use rusqlite::{Transaction, TransactionBehavior};
use serde_json::json;

use crate::db::models::{
    AttendanceMode, AuditAction, LearningPacket, MessageKind, Protocol, ProtocolAudit,
    ProtocolMessage, ProtocolStatus, SatisfactionSurvey, SessionRef,
};
use crate::db::repos::{audits, learning as learning_repo, messages, protocols, sequence, surveys};
use crate::db::DbPool;
use crate::engine::learning;
use crate::error::AppError;
use crate::runtime::SessionReader;

pub struct ProtocolLifecycle {
    pool: DbPool,
    reader: Arc<dyn SessionReader>,
    number_prefix: String,
}

impl ProtocolLifecycle {
    pub fn new(pool: DbPool, reader: Arc<dyn SessionReader>, number_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            reader,
            number_prefix: number_prefix.into(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, AppError>) -> Result<T, AppError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Return the open protocol for this conversation, or open a new one.
    /// The bool is true when a protocol was created by this call.
    pub fn find_or_create_for_session(&self, session: &SessionRef) -> Result<(Protocol, bool), AppError> {
        self.with_tx(|tx| {
            if let Some(existing) =
                protocols::find_open_for_session(tx, &session.instance_id, &session.session_id)?
            {
                return Ok((existing, false));
            }

            let now = chrono::Utc::now();
            let now_str = crate::db::to_ts(now);
            let number = sequence::next_number(tx, &self.number_prefix, now.year())?;
            let id = uuid::Uuid::new_v4().to_string();

            protocols::insert(tx, &id, &number, session, &now_str)?;
            audits::insert(
                tx,
                &id,
                None,
                AuditAction::Created,
                &json!({
                    "number": number,
                    "session_id": session.session_id,
                    "contact_id": session.contact_id,
                    "channel": session.channel,
                }),
                &now_str,
            )?;

            tracing::info!(
                protocol_id = %id,
                number = %number,
                instance_id = %session.instance_id,
                session_id = %session.session_id,
                "Protocol opened"
            );
            Ok((protocols::get_by_id(tx, &id)?, true))
        })
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// Request human help. Allowed from any open status except ESCALATED;
    /// re-escalation after a return to the AI is unbounded.
    pub fn escalate_protocol(&self, id: &str, reason: &str) -> Result<Protocol, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("Escalation reason must not be empty".into()));
        }

        self.with_tx(|tx| {
            let protocol = protocols::get_by_id(tx, id)?;
            match protocol.status {
                ProtocolStatus::Closed => {
                    return Err(AppError::Validation(format!(
                        "Protocol {} is closed",
                        protocol.number
                    )))
                }
                ProtocolStatus::Escalated => {
                    return Err(AppError::Validation(format!(
                        "Protocol {} is already escalated",
                        protocol.number
                    )))
                }
                _ => {}
            }

            let now = crate::db::now_ts();
            protocols::mark_escalated(tx, id, reason, &now)?;
            audits::insert(
                tx,
                id,
                None,
                AuditAction::Escalated,
                &json!({
                    "reason": reason,
                    "previous_status": protocol.status,
                    "escalation_count": protocol.escalation_count + 1,
                }),
                &now,
            )?;

            tracing::info!(protocol_id = %id, reason = %reason, "Protocol escalated");
            protocols::get_by_id(tx, id)
        })
    }

    /// A human takes the protocol in one of the human modes.
    pub fn assign_protocol(&self, id: &str, user_id: &str, mode: AttendanceMode) -> Result<Protocol, AppError> {
        if mode == AttendanceMode::AiOnly {
            return Err(AppError::Validation(
                "Assignment requires a human attendance mode".into(),
            ));
        }

        self.with_tx(|tx| {
            let protocol = protocols::get_by_id(tx, id)?;
            ensure_open(&protocol)?;

            let now = crate::db::now_ts();
            protocols::mark_assigned(tx, id, user_id, mode, &now)?;
            audits::insert(
                tx,
                id,
                Some(user_id),
                AuditAction::Assigned,
                &json!({
                    "user_id": user_id,
                    "mode": mode,
                    "previous_status": protocol.status,
                    "previous_assignee": protocol.assigned_user_id,
                }),
                &now,
            )?;

            tracing::info!(protocol_id = %id, user_id = %user_id, mode = %mode, "Protocol assigned");
            protocols::get_by_id(tx, id)
        })
    }

    /// Change attendance mode.
    ///
    /// `AI_ONLY` is a combined transition: assignment cleared and status back
    /// to ACTIVE, so AI-only never coexists with IN_PROGRESS. Switching an
    /// unassigned protocol to a human mode assigns it to `user_id`.
    pub fn change_mode(&self, id: &str, mode: AttendanceMode, user_id: &str) -> Result<Protocol, AppError> {
        self.with_tx(|tx| {
            let protocol = protocols::get_by_id(tx, id)?;
            ensure_open(&protocol)?;

            let unchanged = protocol.mode == mode
                && (mode != AttendanceMode::AiOnly || protocol.status == ProtocolStatus::Active);
            if unchanged {
                return Ok(protocol);
            }

            let now = crate::db::now_ts();
            let action = match mode {
                AttendanceMode::AiOnly => {
                    protocols::return_to_ai(tx, id, &now)?;
                    AuditAction::ReturnedToAi
                }
                human => {
                    if protocol.assigned_user_id.is_none() {
                        protocols::mark_assigned(tx, id, user_id, human, &now)?;
                    } else {
                        protocols::set_mode(tx, id, human, &now)?;
                    }
                    if human == AttendanceMode::HumanTakeover {
                        AuditAction::Takeover
                    } else {
                        AuditAction::ModeChanged
                    }
                }
            };

            audits::insert(
                tx,
                id,
                Some(user_id),
                action,
                &json!({
                    "from": protocol.mode,
                    "to": mode,
                    "previous_status": protocol.status,
                }),
                &now,
            )?;

            tracing::info!(protocol_id = %id, from = %protocol.mode, to = %mode, "Attendance mode changed");
            protocols::get_by_id(tx, id)
        })
    }

    /// Close the protocol. Terminal; forces AI-only mode.
    ///
    /// When the protocol went through escalation, a learning packet is
    /// captured afterwards. Capture failures are logged and never fail the close.
    pub async fn close_protocol(
        &self,
        id: &str,
        user_id: Option<&str>,
        reason: Option<&str>,
        result: Option<&str>,
    ) -> Result<Protocol, AppError> {
        let closed = self.with_tx(|tx| {
            let protocol = protocols::get_by_id(tx, id)?;
            ensure_open(&protocol)?;

            let now = crate::db::now_ts();
            protocols::mark_closed(tx, id, user_id, reason, result, &now)?;
            audits::insert(
                tx,
                id,
                user_id,
                AuditAction::Closed,
                &json!({
                    "reason": reason,
                    "result": result,
                    "previous_status": protocol.status,
                    "previous_mode": protocol.mode,
                }),
                &now,
            )?;
            protocols::get_by_id(tx, id)
        })?;

        tracing::info!(protocol_id = %id, number = %closed.number, "Protocol closed");

        if closed.was_escalated() {
            learning::capture_best_effort(&self.pool, self.reader.as_ref(), &closed).await;
        }

        Ok(closed)
    }

    // ------------------------------------------------------------------
    // Messages and surveys
    // ------------------------------------------------------------------

    pub fn add_message(
        &self,
        id: &str,
        user_id: Option<&str>,
        kind: MessageKind,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ProtocolMessage, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Message content must not be empty".into()));
        }
        let metadata = metadata.map(serde_json::to_string).transpose()?;

        self.with_tx(|tx| {
            protocols::get_by_id(tx, id)?;

            let now = crate::db::now_ts();
            let message = messages::insert(tx, id, user_id, kind, content, metadata.as_deref(), &now)?;
            let action = if kind == MessageKind::Note {
                AuditAction::NoteAdded
            } else {
                AuditAction::MessageSent
            };
            audits::insert(
                tx,
                id,
                user_id,
                action,
                &json!({ "message_id": message.id, "kind": kind }),
                &now,
            )?;
            Ok(message)
        })
    }

    pub fn send_survey(&self, id: &str, user_id: Option<&str>) -> Result<SatisfactionSurvey, AppError> {
        self.with_tx(|tx| {
            let protocol = protocols::get_by_id(tx, id)?;
            if surveys::get_by_protocol(tx, id)?.is_some() {
                return Err(AppError::Validation(format!(
                    "Survey already sent for protocol {}",
                    protocol.number
                )));
            }

            let now = crate::db::now_ts();
            let survey = surveys::insert(tx, id, user_id, &now)?;
            audits::insert(
                tx,
                id,
                user_id,
                AuditAction::SurveySent,
                &json!({ "survey_id": survey.id }),
                &now,
            )?;

            tracing::debug!(protocol_id = %id, "Satisfaction survey sent");
            Ok(survey)
        })
    }

    pub fn answer_survey(
        &self,
        id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<SatisfactionSurvey, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation(format!(
                "Rating must be between 1 and 5, got {rating}"
            )));
        }

        self.with_tx(|tx| {
            let survey = surveys::get_by_protocol(tx, id)?
                .ok_or_else(|| AppError::NotFound(format!("Survey for protocol {id}")))?;
            if survey.answered_at.is_some() {
                return Err(AppError::Validation(format!(
                    "Survey for protocol {id} is already answered"
                )));
            }

            let now = crate::db::now_ts();
            if !surveys::record_answer(tx, id, rating, comment, &now)? {
                return Err(AppError::Validation(format!(
                    "Survey for protocol {id} is already answered"
                )));
            }
            audits::insert(
                tx,
                id,
                None,
                AuditAction::SurveyAnswered,
                &json!({ "survey_id": survey.id, "rating": rating, "comment": comment }),
                &now,
            )?;

            tracing::info!(protocol_id = %id, rating, "Satisfaction survey answered");
            surveys::get_by_protocol(tx, id)?
                .ok_or_else(|| AppError::NotFound(format!("Survey for protocol {id}")))
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Continuity hint: who last closed an assigned protocol for this contact.
    pub fn suggest_attendant(&self, instance_id: &str, contact_id: &str) -> Result<Option<String>, AppError> {
        let conn = self.pool.get()?;
        protocols::last_closer_for_contact(&conn, instance_id, contact_id)
    }

    pub fn get_protocol(&self, id: &str) -> Result<Protocol, AppError> {
        let conn = self.pool.get()?;
        protocols::get_by_id(&conn, id)
    }

    pub fn list_by_status(&self, instance_id: &str, status: ProtocolStatus) -> Result<Vec<Protocol>, AppError> {
        let conn = self.pool.get()?;
        protocols::list_by_status(&conn, instance_id, status)
    }

    pub fn list_audit_trail(&self, id: &str) -> Result<Vec<ProtocolAudit>, AppError> {
        let conn = self.pool.get()?;
        audits::get_by_protocol(&conn, id)
    }

    pub fn list_messages(&self, id: &str) -> Result<Vec<ProtocolMessage>, AppError> {
        let conn = self.pool.get()?;
        messages::get_by_protocol(&conn, id)
    }

    pub fn survey(&self, id: &str) -> Result<Option<SatisfactionSurvey>, AppError> {
        let conn = self.pool.get()?;
        surveys::get_by_protocol(&conn, id)
    }

    pub fn learning_packet(&self, id: &str) -> Result<Option<LearningPacket>, AppError> {
        let conn = self.pool.get()?;
        learning_repo::get_by_protocol(&conn, id)
    }
}

fn ensure_open(protocol: &Protocol) -> Result<(), AppError> {
    if protocol.status == ProtocolStatus::Closed {
        return Err(AppError::Validation(format!(
            "Protocol {} is closed",
            protocol.number
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreateInstanceInput, Instance, NewLearningPacket};
    use crate::db::repos::instances;
    use crate::runtime::fake::{assistant, user, FakeSessionReader};

    pub(crate) fn setup() -> (ProtocolLifecycle, Arc<FakeSessionReader>, Instance) {
        let pool = init_test_db().unwrap();
        let instance = instances::create(
            &pool,
            CreateInstanceInput {
                name: "Loja Centro".into(),
                container_host: Some("10.0.0.1:8080".into()),
                container_name: Some("bot-centro".into()),
            },
        )
        .unwrap();
        instances::add_channel(&pool, &instance.id, "whatsapp", true).unwrap();
        let reader = Arc::new(FakeSessionReader::new());
        let lifecycle = ProtocolLifecycle::new(pool, reader.clone(), "ATD");
        (lifecycle, reader, instance)
    }

    pub(crate) fn session_ref(instance: &Instance, session_id: &str) -> SessionRef {
        SessionRef {
            instance_id: instance.id.clone(),
            session_id: session_id.into(),
            contact_id: "+5511999990000".into(),
            channel: "whatsapp".into(),
            contact_name: Some("Maria".into()),
        }
    }

    fn count(lc: &ProtocolLifecycle, id: &str, action: AuditAction) -> i64 {
        let conn = lc.pool().get().unwrap();
        audits::count_by_action(&conn, id, action).unwrap()
    }

    #[test]
    fn test_find_or_create_is_idempotent() {
        let (lc, _, instance) = setup();
        let session = session_ref(&instance, "s-1");

        let (first, created) = lc.find_or_create_for_session(&session).unwrap();
        assert!(created);
        assert_eq!(first.status, ProtocolStatus::Active);
        assert_eq!(first.mode, AttendanceMode::AiOnly);
        assert_eq!(first.contact_name.as_deref(), Some("Maria"));

        let (second, created) = lc.find_or_create_for_session(&session).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(count(&lc, &first.id, AuditAction::Created), 1);
    }

    #[test]
    fn test_protocol_numbers_are_sequential() {
        let (lc, _, instance) = setup();
        let year = chrono::Utc::now().year();
        let a = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap().0;
        let b = lc.find_or_create_for_session(&session_ref(&instance, "s-2")).unwrap().0;
        assert_eq!(a.number, format!("ATD-{year}-000001"));
        assert_eq!(b.number, format!("ATD-{year}-000002"));
    }

    #[tokio::test]
    async fn test_closed_session_gets_a_new_protocol() {
        let (lc, _, instance) = setup();
        let session = session_ref(&instance, "s-1");
        let (first, _) = lc.find_or_create_for_session(&session).unwrap();
        lc.close_protocol(&first.id, Some("agent-1"), Some("resolved"), Some("ok"))
            .await
            .unwrap();

        let (second, created) = lc.find_or_create_for_session(&session).unwrap();
        assert!(created);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_escalate_records_reason_and_audit() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();

        let escalated = lc.escalate_protocol(&p.id, "  cliente furioso ").unwrap();
        assert_eq!(escalated.status, ProtocolStatus::Escalated);
        assert_eq!(escalated.escalation_reason.as_deref(), Some("cliente furioso"));
        assert!(escalated.escalated_at.is_some());
        assert_eq!(escalated.escalation_count, 1);

        let again = lc.escalate_protocol(&p.id, "de novo");
        assert!(matches!(again, Err(AppError::Validation(_))));
        assert_eq!(count(&lc, &p.id, AuditAction::Escalated), 1);
    }

    #[test]
    fn test_escalate_requires_reason() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        assert!(matches!(lc.escalate_protocol(&p.id, "   "), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_assign_sets_in_progress() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.escalate_protocol(&p.id, "billing").unwrap();

        let assigned = lc
            .assign_protocol(&p.id, "agent-7", AttendanceMode::HumanAssisted)
            .unwrap();
        assert_eq!(assigned.status, ProtocolStatus::InProgress);
        assert_eq!(assigned.assigned_user_id.as_deref(), Some("agent-7"));
        assert!(assigned.assigned_at.is_some());
        assert_eq!(assigned.mode, AttendanceMode::HumanAssisted);
        assert_eq!(count(&lc, &p.id, AuditAction::Assigned), 1);

        let ai_only = lc.assign_protocol(&p.id, "agent-7", AttendanceMode::AiOnly);
        assert!(matches!(ai_only, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_return_to_ai_clears_assignment_from_any_status() {
        let (lc, _, instance) = setup();

        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanTakeover).unwrap();
        let back = lc.change_mode(&p.id, AttendanceMode::AiOnly, "agent-1").unwrap();
        assert_eq!(back.status, ProtocolStatus::Active);
        assert_eq!(back.mode, AttendanceMode::AiOnly);
        assert!(back.assigned_user_id.is_none());
        assert!(back.assigned_at.is_none());
        assert_eq!(count(&lc, &p.id, AuditAction::ReturnedToAi), 1);

        let (q, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-2")).unwrap();
        lc.escalate_protocol(&q.id, "x").unwrap();
        let back = lc.change_mode(&q.id, AttendanceMode::AiOnly, "agent-2").unwrap();
        assert_eq!(back.status, ProtocolStatus::Active);
        assert_eq!(count(&lc, &q.id, AuditAction::ReturnedToAi), 1);
    }

    #[test]
    fn test_mode_change_audit_actions() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();

        let assisted = lc.change_mode(&p.id, AttendanceMode::HumanAssisted, "agent-1").unwrap();
        assert_eq!(assisted.status, ProtocolStatus::InProgress);
        assert_eq!(assisted.assigned_user_id.as_deref(), Some("agent-1"));
        assert_eq!(count(&lc, &p.id, AuditAction::ModeChanged), 1);

        let takeover = lc.change_mode(&p.id, AttendanceMode::HumanTakeover, "agent-1").unwrap();
        assert_eq!(takeover.mode, AttendanceMode::HumanTakeover);
        assert_eq!(count(&lc, &p.id, AuditAction::Takeover), 1);

        // Same mode again is not a transition.
        lc.change_mode(&p.id, AttendanceMode::HumanTakeover, "agent-1").unwrap();
        assert_eq!(count(&lc, &p.id, AuditAction::Takeover), 1);
    }

    #[test]
    fn test_re_escalation_after_return_to_ai() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.escalate_protocol(&p.id, "first").unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanAssisted).unwrap();
        lc.change_mode(&p.id, AttendanceMode::AiOnly, "agent-1").unwrap();

        let again = lc.escalate_protocol(&p.id, "second").unwrap();
        assert_eq!(again.status, ProtocolStatus::Escalated);
        assert_eq!(again.escalation_reason.as_deref(), Some("second"));
        assert_eq!(again.escalation_count, 2);
        assert_eq!(count(&lc, &p.id, AuditAction::Escalated), 2);
    }

    #[tokio::test]
    async fn test_closed_protocol_rejects_transitions() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanTakeover).unwrap();

        let closed = lc.close_protocol(&p.id, Some("agent-1"), Some("done"), Some("solved")).await.unwrap();
        assert_eq!(closed.status, ProtocolStatus::Closed);
        assert_eq!(closed.mode, AttendanceMode::AiOnly);
        assert_eq!(closed.closed_by.as_deref(), Some("agent-1"));
        assert_eq!(closed.close_result.as_deref(), Some("solved"));
        assert!(closed.closed_at.is_some());

        assert!(matches!(lc.escalate_protocol(&p.id, "x"), Err(AppError::Validation(_))));
        assert!(matches!(
            lc.change_mode(&p.id, AttendanceMode::AiOnly, "agent-1"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            lc.close_protocol(&p.id, None, None, None).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(count(&lc, &p.id, AuditAction::Closed), 1);
    }

    #[tokio::test]
    async fn test_close_after_escalation_captures_one_packet() {
        let (lc, reader, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        reader.set_messages(
            "s-1",
            vec![
                assistant("Olá!"),
                user("quero reembolso"),
                assistant("Entendo. [ESCALAR: pedido de reembolso]"),
            ],
        );
        lc.escalate_protocol(&p.id, "pedido de reembolso").unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanTakeover).unwrap();
        lc.add_message(&p.id, Some("agent-1"), MessageKind::Note, "cliente VIP", None).unwrap();
        lc.add_message(&p.id, Some("agent-1"), MessageKind::DirectMessage, "Reembolso aprovado", None)
            .unwrap();
        lc.add_message(&p.id, None, MessageKind::System, "Atendimento transferido", None)
            .unwrap();

        lc.close_protocol(&p.id, Some("agent-1"), Some("resolved"), Some("refund issued"))
            .await
            .unwrap();

        let packet = lc.learning_packet(&p.id).unwrap().expect("packet captured");
        assert_eq!(packet.instance_id, instance.id);
        assert_eq!(packet.escalation_reason, "pedido de reembolso");
        assert_eq!(packet.human_response, "cliente VIP\nReembolso aprovado");
        assert_eq!(packet.ai_context, "Olá!\n---\nEntendo. [ESCALAR: pedido de reembolso]");
        assert_eq!(packet.resolution.as_deref(), Some("refund issued"));
        assert_eq!(packet.tags, vec!["pedido de reembolso".to_string()]);
    }

    #[tokio::test]
    async fn test_close_without_escalation_captures_nothing() {
        let (lc, reader, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.close_protocol(&p.id, None, Some("idle"), None).await.unwrap();
        assert!(lc.learning_packet(&p.id).unwrap().is_none());
        assert_eq!(reader.fetches(), 0);
    }

    #[tokio::test]
    async fn test_close_survives_transcript_failure() {
        let (lc, reader, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        reader.fail_session("s-1");
        lc.escalate_protocol(&p.id, "urgent").unwrap();

        let closed = lc.close_protocol(&p.id, Some("agent-1"), None, None).await.unwrap();
        assert_eq!(closed.status, ProtocolStatus::Closed);

        let packet = lc.learning_packet(&p.id).unwrap().expect("packet captured");
        assert!(packet.ai_context.contains("s-1"));
        assert_eq!(packet.human_response, learning::NO_HUMAN_RESPONSE);
    }

    #[tokio::test]
    async fn test_close_survives_capture_write_failure() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.escalate_protocol(&p.id, "urgent").unwrap();
        {
            // Occupy the write-once slot so the capture insert fails.
            let conn = lc.pool().get().unwrap();
            learning_repo::insert(
                &conn,
                NewLearningPacket {
                    protocol_id: p.id.clone(),
                    instance_id: instance.id.clone(),
                    escalation_reason: "earlier".into(),
                    ai_context: "-".into(),
                    human_response: "-".into(),
                    resolution: None,
                    tags: vec![],
                },
            )
            .unwrap();
        }

        let closed = lc.close_protocol(&p.id, None, None, None).await.unwrap();
        assert_eq!(closed.status, ProtocolStatus::Closed);
        assert_eq!(lc.learning_packet(&p.id).unwrap().unwrap().escalation_reason, "earlier");
    }

    #[test]
    fn test_add_message_audits_by_kind() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();

        lc.add_message(&p.id, Some("agent-1"), MessageKind::Note, "nota", None).unwrap();
        let meta = serde_json::json!({"template": "greeting"});
        let msg = lc
            .add_message(&p.id, None, MessageKind::DirectMessage, "Olá", Some(&meta))
            .unwrap();
        assert_eq!(msg.metadata.as_deref(), Some(r#"{"template":"greeting"}"#));

        assert_eq!(count(&lc, &p.id, AuditAction::NoteAdded), 1);
        assert_eq!(count(&lc, &p.id, AuditAction::MessageSent), 1);
        assert_eq!(lc.list_messages(&p.id).unwrap().len(), 2);
        assert!(matches!(
            lc.add_message(&p.id, None, MessageKind::Note, "  ", None),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_survey_send_and_answer() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.close_protocol(&p.id, Some("agent-1"), None, None).await.unwrap();

        let survey = lc.send_survey(&p.id, Some("agent-1")).unwrap();
        assert!(survey.answered_at.is_none());
        assert!(matches!(lc.send_survey(&p.id, None), Err(AppError::Validation(_))));

        assert!(matches!(lc.answer_survey(&p.id, 6, None), Err(AppError::Validation(_))));
        let answered = lc.answer_survey(&p.id, 4, Some("bom")).unwrap();
        assert_eq!(answered.rating, Some(4));
        assert_eq!(answered.comment.as_deref(), Some("bom"));
        assert!(answered.answered_at.is_some());
        assert!(matches!(lc.answer_survey(&p.id, 5, None), Err(AppError::Validation(_))));

        assert_eq!(count(&lc, &p.id, AuditAction::SurveySent), 1);
        assert_eq!(count(&lc, &p.id, AuditAction::SurveyAnswered), 1);
        // Status untouched by surveys.
        assert_eq!(lc.get_protocol(&p.id).unwrap().status, ProtocolStatus::Closed);
    }

    #[test]
    fn test_answer_without_survey_is_not_found() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        assert!(matches!(lc.answer_survey(&p.id, 3, None), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_suggest_attendant_uses_last_closer() {
        let (lc, _, instance) = setup();
        assert_eq!(lc.suggest_attendant(&instance.id, "+5511999990000").unwrap(), None);

        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanTakeover).unwrap();
        lc.close_protocol(&p.id, Some("agent-1"), None, None).await.unwrap();

        // Closed without ever being assigned: not a continuity signal.
        let (q, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-2")).unwrap();
        lc.close_protocol(&q.id, Some("agent-9"), None, None).await.unwrap();

        assert_eq!(
            lc.suggest_attendant(&instance.id, "+5511999990000").unwrap().as_deref(),
            Some("agent-1")
        );
        assert_eq!(lc.suggest_attendant(&instance.id, "someone-else").unwrap(), None);
    }

    #[test]
    fn test_audit_trail_is_ordered() {
        let (lc, _, instance) = setup();
        let (p, _) = lc.find_or_create_for_session(&session_ref(&instance, "s-1")).unwrap();
        lc.escalate_protocol(&p.id, "x").unwrap();
        lc.assign_protocol(&p.id, "agent-1", AttendanceMode::HumanAssisted).unwrap();

        let actions: Vec<AuditAction> = lc.list_audit_trail(&p.id).unwrap().into_iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Created, AuditAction::Escalated, AuditAction::Assigned]
        );
        let listed = lc.list_by_status(&instance.id, ProtocolStatus::InProgress).unwrap();
        assert_eq!(listed.len(), 1);
    }
}
