//! The session record (spec.md §3, §4.4) — per-session mutable state.
//!
//! Plain data + a `parking_lot`-free, single-owner discipline: the relay
//! core holds one `Session` behind its own task and mutates it directly, the
//! way the teacher's `SessionLockMap`/`CancelMap` favor a guarded plain
//! struct over an actor abstraction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use vrelay_domain::config::SessionConfig;
use vrelay_domain::ids::{AgentId, LearnerId, SessionId, TenantId};

use crate::turn::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine (spec.md §3, §4.6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    LearnerSpeaking,
    AgentThinking,
    AgentSpeaking,
    Paused,
    Ending,
    Closed,
}

impl SessionState {
    pub fn has_current_turn(&self) -> bool {
        matches!(self, SessionState::LearnerSpeaking | SessionState::AgentSpeaking)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics (spec.md §3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_LATENCY_SAMPLES: usize = 64;
const MAX_ERROR_LOG: usize = 32;

#[derive(Debug, Clone)]
pub struct ErrorLogEntry {
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub turn_count: u32,
    pub learner_speaking_ms: i64,
    pub agent_speaking_ms: i64,
    pub reconnect_attempts: u32,
    latency_samples: VecDeque<i64>,
    error_log: VecDeque<ErrorLogEntry>,
}

impl Metrics {
    pub fn record_latency_ms(&mut self, latency_ms: i64) {
        if self.latency_samples.len() == MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    pub fn record_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        if self.error_log.len() == MAX_ERROR_LOG {
            self.error_log.pop_front();
        }
        self.error_log.push_back(ErrorLogEntry {
            code: code.into(),
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    pub fn latency_samples(&self) -> &VecDeque<i64> {
        &self.latency_samples
    }

    pub fn error_log(&self) -> &VecDeque<ErrorLogEntry> {
        &self.error_log
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ring buffer (spec.md §3, §5, §9 — coarse FIFO with half-drop eviction)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct RingBuffer {
    cap: usize,
    buf: Vec<u8>,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self { cap, buf: Vec::new() }
    }

    /// Append a chunk, coarse-evicting the oldest half if the cap is
    /// exceeded. Eviction is intentionally imprecise — the buffer only
    /// feeds the next pronunciation assessment, not a durable record.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.cap {
            let drop_to = self.buf.len() / 2;
            self.buf.drain(0..drop_to);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take and clear the buffered audio, for handing to the assessor.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod ring_buffer_tests {
    use super::*;

    #[test]
    fn push_within_cap_keeps_everything() {
        let mut rb = RingBuffer::new(10);
        rb.push(&[1, 2, 3]);
        rb.push(&[4, 5]);
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn push_beyond_cap_evicts_oldest_half() {
        let mut rb = RingBuffer::new(10);
        rb.push(&[0u8; 8]);
        rb.push(&[0u8; 4]); // total 12 > cap 10 -> drop to 6, then 6 remains
        assert!(rb.len() <= 10);
        assert_eq!(rb.len(), 6);
    }

    #[test]
    fn take_clears_buffer() {
        let mut rb = RingBuffer::new(10);
        rb.push(&[1, 2, 3]);
        let taken = rb.take();
        assert_eq!(taken, vec![1, 2, 3]);
        assert_eq!(rb.len(), 0);
    }

    #[test]
    fn never_exceeds_cap_after_repeated_pushes() {
        let mut rb = RingBuffer::new(16);
        for _ in 0..20 {
            rb.push(&[0u8; 3]);
            assert!(rb.len() <= 16);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub learner_id: LearnerId,
    pub agent_id: AgentId,
    pub config: SessionConfig,
    pub state: SessionState,
    pub current_turn: Option<Turn>,
    pub turns: Vec<Turn>,
    pub ring_buffer: RingBuffer,
    pub metrics: Metrics,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        tenant_id: TenantId,
        learner_id: LearnerId,
        agent_id: AgentId,
        config: SessionConfig,
        max_audio_buffer_bytes: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tenant_id,
            learner_id,
            agent_id,
            config,
            state: SessionState::Connecting,
            current_turn: None,
            turns: Vec::new(),
            ring_buffer: RingBuffer::new(max_audio_buffer_bytes),
            metrics: Metrics::default(),
            started_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Invariant (ii): exactly one current turn iff state ∈ {learner_speaking,
    /// agent_speaking}. Callers should assert this after every transition in
    /// debug builds / tests.
    pub fn invariant_current_turn_matches_state(&self) -> bool {
        self.state.has_current_turn() == self.current_turn.is_some()
    }

    /// Invariant (iii): ring buffer byte-length never exceeds the cap.
    pub fn invariant_ring_buffer_within_cap(&self, cap: usize) -> bool {
        self.ring_buffer.len() <= cap
    }

    pub fn duration_ms(&self) -> i64 {
        Utc::now().signed_duration_since(self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrelay_domain::config::SessionConfig;

    fn make_session() -> Session {
        Session::new(
            SessionId::from("s1"),
            TenantId::from("t1"),
            LearnerId::from("l1"),
            AgentId::from("a1"),
            SessionConfig::default(),
            1024,
        )
    }

    #[test]
    fn new_session_starts_connecting_with_no_current_turn() {
        let s = make_session();
        assert_eq!(s.state, SessionState::Connecting);
        assert!(s.current_turn.is_none());
        assert!(s.invariant_current_turn_matches_state());
    }

    #[test]
    fn invariant_holds_once_speaking() {
        let mut s = make_session();
        s.state = SessionState::LearnerSpeaking;
        assert!(!s.invariant_current_turn_matches_state());
        s.current_turn = Some(Turn::new(1, vrelay_protocol::Speaker::Learner));
        assert!(s.invariant_current_turn_matches_state());
    }

    #[test]
    fn closed_state_is_terminal() {
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Ready.is_terminal());
    }
}
