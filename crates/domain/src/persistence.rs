//! The `PersistenceSink` collaborator (spec.md §1: "a `PersistenceSink`
//! interface is assumed"). Two calls only: resolve a pre-provisioned
//! session's seed record on `session.start`, and flush a completed turn.
//!
//! Grounded in `sa_sessions::store::SessionStore`'s `resolve_or_create` /
//! file-backed persistence shape, but expressed as a trait (the real
//! backend is a REST-layer database out of this crate's scope) with a
//! `parking_lot`-guarded in-memory default so the relay is runnable
//! standalone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::ids::{AgentId, LearnerId, SessionId, TenantId, TurnId};

/// The pre-provisioned session record loaded on `session.start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeed {
    pub tenant_id: TenantId,
    pub learner_id: LearnerId,
    pub agent_id: AgentId,
    /// Explicit upstream websocket URL, if the session record carries one.
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default)]
    pub config: SessionConfig,
}

/// A finalized turn, as flushed to persistence by the turn tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: TurnId,
    pub session_id: SessionId,
    pub speaker: String,
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub final_transcript: String,
    pub language: Option<String>,
    pub assessment: Option<serde_json::Value>,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Load the seed record for a pre-provisioned session. `Ok(None)` means
    /// the record is missing — the caller should fail admission with
    /// `SESSION_START_FAILED` (spec.md §9 open question).
    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionSeed>>;

    /// Persist a completed turn. Failures are logged by the caller and
    /// never retried (spec.md §4.10).
    async fn flush_turn(&self, turn: &TurnRecord) -> Result<()>;
}

/// In-memory default, so the relay boots and runs end-to-end without an
/// external database — sessions must be pre-seeded via [`InMemoryPersistenceSink::seed`].
#[derive(Default)]
pub struct InMemoryPersistenceSink {
    seeds: RwLock<HashMap<SessionId, SessionSeed>>,
    turns: RwLock<Vec<TurnRecord>>,
}

impl InMemoryPersistenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn seed(&self, session_id: SessionId, seed: SessionSeed) {
        self.seeds.write().insert(session_id, seed);
    }

    /// Turns flushed so far, oldest first. Test/debug helper.
    pub fn flushed_turns(&self) -> Vec<TurnRecord> {
        self.turns.read().clone()
    }
}

#[async_trait]
impl PersistenceSink for InMemoryPersistenceSink {
    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionSeed>> {
        Ok(self.seeds.read().get(session_id).cloned())
    }

    async fn flush_turn(&self, turn: &TurnRecord) -> Result<()> {
        self.turns.write().push(turn.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_session_returns_none() {
        let sink = InMemoryPersistenceSink::new();
        let result = sink.load_session(&SessionId::from("nope")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn seeded_session_is_returned() {
        let sink = InMemoryPersistenceSink::new();
        let seed = SessionSeed {
            tenant_id: TenantId::from("t1"),
            learner_id: LearnerId::from("l1"),
            agent_id: AgentId::from("a1"),
            websocket_url: None,
            config: SessionConfig::default(),
        };
        sink.seed(SessionId::from("s1"), seed);
        let result = sink
            .load_session(&SessionId::from("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.tenant_id.as_str(), "t1");
    }

    #[tokio::test]
    async fn flush_turn_accumulates() {
        let sink = InMemoryPersistenceSink::new();
        let turn = TurnRecord {
            turn_id: TurnId::generate(),
            session_id: SessionId::from("s1"),
            speaker: "learner".into(),
            sequence: 1,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            final_transcript: "hello".into(),
            language: None,
            assessment: None,
        };
        sink.flush_turn(&turn).await.unwrap();
        assert_eq!(sink.flushed_turns().len(), 1);
    }
}
