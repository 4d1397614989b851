//! Session poller: one cycle reconciles every live AI session with a
//! protocol, raises escalations the AI asked for, and picks up survey
//! answers.
//!
//! Runtime I/O failures are contained to the session, survey, or instance
//! they belong to. Overlapping cycles are harmless: find-or-create is
//! idempotent and escalation refuses an already ESCALATED protocol.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

use crate::config::PollerConfig;
use crate::db::models::{Instance, PendingSurvey, ProtocolStatus, SessionRef};
use crate::db::repos::{instances, surveys};
use crate::engine::background::{DedupGuards, PollerState};
use crate::engine::detectors;
use crate::engine::lifecycle::ProtocolLifecycle;
use crate::error::AppError;
use crate::runtime::{SessionReader, SessionSummary};

/// Tally of one cycle. Also folded into [`PollerState`] counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub instances: u64,
    pub sessions_seen: u64,
    pub protocols_created: u64,
    pub escalations_raised: u64,
    pub surveys_answered: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOutcome {
    /// Idle past the creation window.
    Stale,
    /// A human has (or had) the protocol.
    HumanOwned,
    /// Idle past the analysis window.
    Cold,
    /// Already escalated; nothing new to do.
    Guarded,
    Analyzed,
    Escalated,
}

struct SessionResult {
    created: bool,
    outcome: SessionOutcome,
}

pub struct SessionPoller {
    lifecycle: Arc<ProtocolLifecycle>,
    reader: Arc<dyn SessionReader>,
    config: PollerConfig,
    state: Arc<PollerState>,
    guards: DedupGuards,
}

impl SessionPoller {
    pub fn new(
        lifecycle: Arc<ProtocolLifecycle>,
        reader: Arc<dyn SessionReader>,
        config: PollerConfig,
    ) -> Self {
        Self {
            lifecycle,
            reader,
            config,
            state: Arc::new(PollerState::new()),
            guards: DedupGuards::new(),
        }
    }

    pub fn state(&self) -> &Arc<PollerState> {
        &self.state
    }

    pub fn guards(&self) -> &DedupGuards {
        &self.guards
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }

    /// Run one full cycle: every pollable instance, guard pruning, then the
    /// survey sweep.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        match instances::get_pollable(self.lifecycle.pool()) {
            Ok(list) => {
                for instance in &list {
                    report.instances += 1;
                    self.poll_instance(instance, now, &mut report).await;
                }
            }
            Err(e) => tracing::error!("Failed to load pollable instances: {}", e),
        }

        let pruned = self.guards.prune_escalations(now - self.config.guard_ttl());
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned stale escalation guards");
        }

        self.sweep_surveys(now, &mut report).await;

        self.state.record_cycle(&report);
        tracing::debug!(
            instances = report.instances,
            sessions = report.sessions_seen,
            created = report.protocols_created,
            escalated = report.escalations_raised,
            surveys = report.surveys_answered,
            failures = report.failures,
            "Poll cycle complete"
        );
        report
    }

    async fn poll_instance(&self, instance: &Instance, now: DateTime<Utc>, report: &mut CycleReport) {
        let Some((host, container)) = instance.container() else {
            return;
        };

        let sessions = match self
            .bounded("session list", self.reader.list_sessions(host, container))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance.id,
                    container = %container,
                    "Failed to list sessions: {}",
                    e
                );
                report.failures += 1;
                return;
            }
        };

        let results: Vec<(String, Result<SessionResult, AppError>)> = stream::iter(sessions)
            .map(|session| async move {
                let result = self.poll_session(instance, host, container, &session, now).await;
                (session.session_id, result)
            })
            .buffer_unordered(self.config.session_concurrency)
            .collect()
            .await;

        for (session_id, result) in results {
            report.sessions_seen += 1;
            match result {
                Ok(r) => {
                    if r.created {
                        report.protocols_created += 1;
                    }
                    if r.outcome == SessionOutcome::Escalated {
                        report.escalations_raised += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        instance_id = %instance.id,
                        session_id = %session_id,
                        kind = e.kind(),
                        "Session poll failed: {}",
                        e
                    );
                    report.failures += 1;
                }
            }
        }
    }

    async fn poll_session(
        &self,
        instance: &Instance,
        host: &str,
        container: &str,
        session: &SessionSummary,
        now: DateTime<Utc>,
    ) -> Result<SessionResult, AppError> {
        let idle = now - session.updated_at;
        if idle > self.config.creation_window() {
            return Ok(SessionResult {
                created: false,
                outcome: SessionOutcome::Stale,
            });
        }

        let session_ref = SessionRef {
            instance_id: instance.id.clone(),
            session_id: session.session_id.clone(),
            contact_id: session.contact_id(),
            channel: session
                .last_channel
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.config.default_channel.clone()),
            contact_name: session.contact_name(),
        };
        let (protocol, created) = self.lifecycle.find_or_create_for_session(&session_ref)?;
        let done = |outcome: SessionOutcome| -> Result<SessionResult, AppError> {
            Ok(SessionResult { created, outcome })
        };

        if protocol.is_human_owned() {
            return done(SessionOutcome::HumanOwned);
        }
        if idle > self.config.analysis_window() {
            return done(SessionOutcome::Cold);
        }

        let key = guard_key(&instance.id, &session.session_id);
        if self.guards.is_escalation_guarded(&key) {
            if protocol.status == ProtocolStatus::Escalated {
                return done(SessionOutcome::Guarded);
            }
            // Back to ACTIVE: a human returned it, so a new marker counts again.
            self.guards.clear_escalation(&key);
            tracing::debug!(protocol_id = %protocol.id, "Escalation guard cleared");
        }
        if protocol.status == ProtocolStatus::Escalated {
            return done(SessionOutcome::Guarded);
        }

        let turns = self
            .bounded(
                "transcript",
                self.reader.get_session_messages(host, container, &session.session_id),
            )
            .await?;

        let Some(signal) = detectors::detect_escalation(&turns) else {
            return done(SessionOutcome::Analyzed);
        };

        match self.lifecycle.escalate_protocol(&protocol.id, &signal.reason) {
            Ok(_) => {
                self.guards.record_escalation(&key, now);
                done(SessionOutcome::Escalated)
            }
            Err(AppError::Validation(msg)) => {
                // Lost a race with an overlapping cycle.
                tracing::debug!(protocol_id = %protocol.id, "Escalation skipped: {}", msg);
                self.guards.record_escalation(&key, now);
                done(SessionOutcome::Guarded)
            }
            Err(e) => Err(e),
        }
    }

    async fn sweep_surveys(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let since = crate::db::to_ts(now - self.config.survey_window());
        let pending = match surveys::get_unanswered_since(self.lifecycle.pool(), &since) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to load pending surveys: {}", e);
                return;
            }
        };

        for survey in &pending {
            if self.guards.is_survey_handled(&survey.protocol_id) {
                continue;
            }
            match self.check_survey(survey).await {
                Ok(true) => report.surveys_answered += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        protocol_id = %survey.protocol_id,
                        session_id = %survey.session_id,
                        "Survey check failed: {}",
                        e
                    );
                    report.failures += 1;
                }
            }
        }
    }

    /// True when a rating was found and recorded.
    async fn check_survey(&self, survey: &PendingSurvey) -> Result<bool, AppError> {
        let (Some(host), Some(container)) =
            (survey.container_host.as_deref(), survey.container_name.as_deref())
        else {
            return Ok(false);
        };

        let turns = self
            .bounded(
                "transcript",
                self.reader.get_session_messages(host, container, &survey.session_id),
            )
            .await?;
        let Some(rating) = detectors::detect_survey_rating(&turns) else {
            return Ok(false);
        };

        match self.lifecycle.answer_survey(&survey.protocol_id, rating, None) {
            Ok(_) => {
                self.guards.mark_survey_handled(&survey.protocol_id);
                Ok(true)
            }
            Err(AppError::Validation(msg)) => {
                tracing::debug!(protocol_id = %survey.protocol_id, "Survey already answered: {}", msg);
                self.guards.mark_survey_handled(&survey.protocol_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        let limit = self.config.fetch_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("{what} after {}s", limit.as_secs())))?
    }
}

/// Session ids are only unique per runtime container.
fn guard_key(instance_id: &str, session_id: &str) -> String {
    format!("{instance_id}/{session_id}")
}
