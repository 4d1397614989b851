use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::engine::poller::{CycleReport, SessionPoller};

/// Runtime state for the session poller, shared with whoever starts/stops it.
pub struct PollerState {
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    cycles_completed: AtomicU64,
    protocols_created: AtomicU64,
    escalations_raised: AtomicU64,
    surveys_answered: AtomicU64,
    session_failures: AtomicU64,
}

impl Default for PollerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            cycles_completed: AtomicU64::new(0),
            protocols_created: AtomicU64::new(0),
            escalations_raised: AtomicU64::new(0),
            surveys_answered: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            running: self.running.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            protocols_created: self.protocols_created.load(Ordering::Relaxed),
            escalations_raised: self.escalations_raised.load(Ordering::Relaxed),
            surveys_answered: self.surveys_answered.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_cycle(&self, report: &CycleReport) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.protocols_created
            .fetch_add(report.protocols_created, Ordering::Relaxed);
        self.escalations_raised
            .fetch_add(report.escalations_raised, Ordering::Relaxed);
        self.surveys_answered
            .fetch_add(report.surveys_answered, Ordering::Relaxed);
        self.session_failures
            .fetch_add(report.failures, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PollerStats {
    pub running: bool,
    pub cycles_completed: u64,
    pub protocols_created: u64,
    pub escalations_raised: u64,
    pub surveys_answered: u64,
    pub session_failures: u64,
}

/// Process-local dedup state owned by one poller. Cleared on restart.
///
/// Locks are only ever held for a single map operation, never across an await.
#[derive(Default)]
pub struct DedupGuards {
    /// Session key -> when this process last raised an escalation for it.
    escalations: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Protocol ids whose survey answer was already recorded by this process.
    surveys: Mutex<HashSet<String>>,
}

impl DedupGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_escalation_guarded(&self, session_key: &str) -> bool {
        self.escalations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_key)
    }

    pub fn record_escalation(&self, session_key: &str, at: DateTime<Utc>) {
        self.escalations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_key.to_string(), at);
    }

    pub fn clear_escalation(&self, session_key: &str) {
        self.escalations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_key);
    }

    /// Drop escalation entries recorded before `cutoff`. Returns how many went.
    pub fn prune_escalations(&self, cutoff: DateTime<Utc>) -> usize {
        let mut map = self.escalations.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, at| *at >= cutoff);
        before - map.len()
    }

    pub fn escalation_len(&self) -> usize {
        self.escalations.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_survey_handled(&self, protocol_id: &str) -> bool {
        self.surveys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(protocol_id)
    }

    pub fn mark_survey_handled(&self, protocol_id: &str) {
        self.surveys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(protocol_id.to_string());
    }
}

/// Start the poll loop. Returns false (and does nothing) when already running.
pub fn start_session_poller(poller: &Arc<SessionPoller>) -> bool {
    let state = poller.state();
    if state
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::debug!("Session poller already running");
        return false;
    }

    let token = CancellationToken::new();
    *state.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

    tracing::info!(
        interval_secs = poller.interval().as_secs(),
        "Session poller starting"
    );
    tokio::spawn(poll_loop(poller.clone(), token));
    true
}

/// Stop scheduling new cycles. A cycle already in flight runs to completion.
pub fn stop_session_poller(poller: &SessionPoller) -> bool {
    let state = poller.state();
    let token = state.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
    state.running.store(false, Ordering::SeqCst);
    match token {
        Some(token) => {
            token.cancel();
            tracing::info!("Session poller stopped");
            true
        }
        None => false,
    }
}

async fn poll_loop(poller: Arc<SessionPoller>, token: CancellationToken) {
    let mut interval = tokio::time::interval(poller.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        poller.run_cycle(Utc::now()).await;
    }
    tracing::info!("Session poller loop exited");
}
