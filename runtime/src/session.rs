//! Pagination and session aggregation.
//!
//! Sessions are explicit handles keyed by the caller's `sessionId`. Each one
//! walks `Idle → Extracting → AwaitingMore → … → Complete`; `Complete` is
//! terminal. A session that completes on a cap, or sits idle past its TTL, is
//! dropped and leaves a small tombstone so later calls still see `Complete`.
//! Load-more triggers run inside the next pass, after capture is armed.

use crate::binding::PageBinding;
use crate::chain::{AttemptLog, PageTrigger, PassPlan, StrategyChain};
use crate::config::{HarvestConfig, SessionCaps};
use crate::dedup::Deduplicator;
use crate::error::{HarvestError, HarvestResult};
use crate::types::{ContinueTrigger, ExtractionRequest, NormalizedRecord, RejectionReason, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Scroll target when nothing more specific is known.
const WINDOW: &str = "window";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Extracting,
    AwaitingMore,
    Complete,
}

/// Why a session reached `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    PageCap,
    RecordCap,
    WallClock,
    IdleExpired,
    Ended,
}

/// Accumulated state for one `sessionId`.
#[derive(Debug)]
pub struct ExtractionSession {
    pub id: String,
    pub phase: SessionPhase,
    /// Passes run so far; the next pass gets this as its page index.
    pub pages: u32,
    pub records: Vec<NormalizedRecord>,
    pub completion: Option<CompletionReason>,
    /// Container the last pass read, reused as the default scroll target.
    pub container: Option<String>,
    dedup: Deduplicator,
    started: Instant,
    last_used: Instant,
}

impl ExtractionSession {
    fn new(id: &str, similarity_threshold: f64) -> Self {
        let now = Instant::now();
        Self {
            id: id.to_string(),
            phase: SessionPhase::Idle,
            pages: 0,
            records: Vec::new(),
            completion: None,
            container: None,
            dedup: Deduplicator::new(similarity_threshold),
            started: now,
            last_used: now,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Complete
    }

    fn complete(&mut self, reason: CompletionReason) {
        info!(session = %self.id, reason = ?reason, records = self.records.len(), "session complete");
        self.phase = SessionPhase::Complete;
        self.completion = Some(reason);
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            state: self.phase,
            pages: self.pages,
            record_count: self.records.len(),
            elapsed_ms: self.elapsed().as_millis() as u64,
            completion: self.completion,
        }
    }
}

/// Read-only summary served by the `status` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionPhase,
    pub pages: u32,
    pub record_count: usize,
    pub elapsed_ms: u64,
    pub completion: Option<CompletionReason>,
}

/// What one `extract` or `continue` call added to its session.
#[derive(Debug, Clone, PartialEq)]
pub struct PassResult {
    pub session_id: String,
    pub strategy_used: Option<StrategyKind>,
    pub accepted: Vec<NormalizedRecord>,
    pub rejections: BTreeMap<RejectionReason, usize>,
    pub attempts: Vec<AttemptLog>,
    pub stability_timed_out: bool,
    pub page_index: u32,
    pub phase: SessionPhase,
    pub completion: Option<CompletionReason>,
    pub notes: Vec<String>,
    /// Everything the session collected, set when this pass completed it.
    pub final_records: Option<Vec<NormalizedRecord>>,
}

pub struct SessionAggregator {
    sessions: HashMap<String, ExtractionSession>,
    /// Status of recently dropped sessions, oldest first.
    tombstones: VecDeque<SessionStatus>,
    chain: StrategyChain,
    caps: SessionCaps,
    similarity_threshold: f64,
}

impl SessionAggregator {
    pub fn new(config: &HarvestConfig) -> Self {
        Self::with_chain(config, StrategyChain::new(config))
    }

    pub fn with_chain(config: &HarvestConfig, chain: StrategyChain) -> Self {
        Self {
            sessions: HashMap::new(),
            tombstones: VecDeque::new(),
            chain,
            caps: config.session.clone(),
            similarity_threshold: config.dedup.similarity_threshold,
        }
    }

    pub fn session(&self, id: &str) -> Option<&ExtractionSession> {
        self.sessions.get(id)
    }

    /// Status of a live session, or of a recently dropped one.
    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        self.sessions
            .get(id)
            .map(ExtractionSession::status)
            .or_else(|| self.tombstone(id).cloned())
    }

    pub fn phase(&self, id: &str) -> Option<SessionPhase> {
        self.status(id).map(|s| s.state)
    }

    /// Live sessions only.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn tombstone(&self, id: &str) -> Option<&SessionStatus> {
        self.tombstones.iter().find(|t| t.session_id == id)
    }

    fn bury(&mut self, status: SessionStatus) {
        self.tombstones.retain(|t| t.session_id != status.session_id);
        self.tombstones.push_back(status);
        while self.tombstones.len() > self.caps.max_tombstones {
            self.tombstones.pop_front();
        }
    }

    /// Drop sessions idle longer than the configured TTL. Returns how many.
    pub fn expire_idle(&mut self) -> usize {
        let ttl = self.caps.idle_ttl();
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.idle_for() >= ttl)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            if let Some(mut session) = self.sessions.remove(id) {
                if !session.is_complete() {
                    session.complete(CompletionReason::IdleExpired);
                }
                debug!(session = %id, "idle session dropped");
                self.bury(session.status());
            }
        }
        expired.len()
    }

    /// Read the current page into a new or waiting session.
    pub async fn extract(
        &mut self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<PassResult> {
        if self.tombstone(&request.session_id).is_some() {
            return Err(HarvestError::SessionComplete(request.session_id.clone()));
        }
        let threshold = self.similarity_threshold;
        self.sessions
            .entry(request.session_id.clone())
            .or_insert_with(|| ExtractionSession::new(&request.session_id, threshold));
        self.pass(binding, request, None, cancel).await
    }

    /// Read the next page, firing the load-more trigger inside the pass.
    pub async fn continue_session(
        &mut self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<PassResult> {
        let Some(session) = self.sessions.get(&request.session_id) else {
            return Err(match self.tombstone(&request.session_id) {
                Some(_) => HarvestError::SessionComplete(request.session_id.clone()),
                None => HarvestError::UnknownSession(request.session_id.clone()),
            });
        };
        if session.is_complete() {
            return Err(HarvestError::SessionComplete(session.id.clone()));
        }

        let trigger = match &request.trigger {
            Some(ContinueTrigger::Click { selector }) => PageTrigger::Click(selector.clone()),
            Some(ContinueTrigger::Scroll { target: Some(t) }) => PageTrigger::Scroll(t.clone()),
            Some(ContinueTrigger::Scroll { target: None }) | None => PageTrigger::Scroll(
                session
                    .container
                    .clone()
                    .filter(|c| c != "body")
                    .unwrap_or_else(|| WINDOW.to_string()),
            ),
        };
        self.pass(binding, request, Some(trigger), cancel).await
    }

    /// Destroy a session and hand back everything it accumulated.
    pub fn end_session(&mut self, id: &str) -> Option<ExtractionSession> {
        let mut session = self.sessions.remove(id)?;
        if !session.is_complete() {
            session.complete(CompletionReason::Ended);
        }
        Some(session)
    }

    async fn pass(
        &mut self,
        binding: &dyn PageBinding,
        request: &ExtractionRequest,
        trigger: Option<PageTrigger>,
        cancel: &CancellationToken,
    ) -> HarvestResult<PassResult> {
        let caps = self.caps.clone();
        let (page_index, budget, previous) = {
            let session = self
                .sessions
                .get_mut(&request.session_id)
                .ok_or_else(|| HarvestError::UnknownSession(request.session_id.clone()))?;
            if session.is_complete() {
                return Err(HarvestError::SessionComplete(session.id.clone()));
            }
            session.last_used = Instant::now();
            let remaining = caps.max_wall_clock().saturating_sub(session.elapsed());
            if remaining.is_zero() {
                session.complete(CompletionReason::WallClock);
                let status = session.status();
                self.sessions.remove(&request.session_id);
                self.bury(status);
                return Err(HarvestError::SessionComplete(request.session_id.clone()));
            }
            let previous = session.phase;
            session.phase = SessionPhase::Extracting;
            (session.pages, remaining, previous)
        };

        let chained = {
            let seen = self.sessions.get(&request.session_id).map(|s| &s.dedup);
            let plan = PassPlan {
                page_index,
                budget: Some(budget),
                trigger,
                seen,
            };
            self.chain.run(binding, request, &plan, cancel).await
        };

        let session = self
            .sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| HarvestError::UnknownSession(request.session_id.clone()))?;
        session.last_used = Instant::now();
        let outcome = match chained {
            Ok(outcome) => outcome,
            Err(e) => {
                session.phase = previous;
                return Err(e);
            }
        };

        session.pages += 1;
        session.container = Some(outcome.container.clone());
        let mut rejections = outcome.rejections;
        let mut accepted = Vec::new();
        let call_cap = request.max_records.unwrap_or(usize::MAX);

        for record in outcome.records {
            let reason = if session.dedup.is_duplicate(&record) {
                Some(RejectionReason::Duplicate)
            } else if session.records.len() >= caps.max_records || accepted.len() >= call_cap {
                Some(RejectionReason::RecordCapReached)
            } else {
                None
            };
            match reason {
                Some(reason) => *rejections.entry(reason).or_default() += 1,
                None => {
                    session.dedup.admit(&record);
                    session.records.push(record.clone());
                    accepted.push(record);
                }
            }
        }

        if session.records.len() >= caps.max_records {
            session.complete(CompletionReason::RecordCap);
        } else if session.pages >= caps.max_pages {
            session.complete(CompletionReason::PageCap);
        } else if session.elapsed() >= caps.max_wall_clock() {
            session.complete(CompletionReason::WallClock);
        } else {
            session.phase = SessionPhase::AwaitingMore;
        }

        info!(
            session = %session.id,
            page_index,
            accepted = accepted.len(),
            total = session.records.len(),
            phase = ?session.phase,
            "pass merged into session"
        );

        let mut result = PassResult {
            session_id: session.id.clone(),
            strategy_used: outcome.strategy_used,
            accepted,
            rejections,
            attempts: outcome.attempts,
            stability_timed_out: outcome.stability_timed_out,
            page_index,
            phase: session.phase,
            completion: session.completion,
            notes: outcome.notes,
            final_records: None,
        };

        if session.is_complete() {
            if let Some(done) = self.sessions.remove(&request.session_id) {
                self.bury(done.status());
                result.final_records = Some(done.records);
            }
        }
        Ok(result)
    }
}
