//! Shared application state (spec.md §9 open question: one `Supervisor`
//! inside a single `AppState`, rather than splitting admission and
//! bookkeeping into separate services — mirroring the teacher's single
//! `AppState` holding `NodeRegistry` + `ToolRouter` + `CancelMap` together).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use vrelay_domain::assessor::PronunciationAssessor;
use vrelay_domain::config::Config;
use vrelay_domain::events::EventSink;
use vrelay_domain::persistence::PersistenceSink;

use crate::auth::TokenVerifier;
use crate::supervisor::Supervisor;

/// Server-wide counters for `GET /ws/stats` (spec.md §4.9) that don't
/// belong to any single session.
#[derive(Default)]
pub struct ServerStats {
    /// Audio bytes received from learners, not the upstream→learner
    /// direction — see `record_audio_bytes_received`.
    pub total_audio_bytes_received: AtomicU64,
}

impl ServerStats {
    pub fn record_audio_bytes_received(&self, n: u64) {
        self.total_audio_bytes_received.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub assessor: Arc<dyn PronunciationAssessor>,
    pub events: Arc<dyn EventSink>,
    pub stats: Arc<ServerStats>,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
