//! `GET /ws/stats` (spec.md §4.9, §6): a read-only snapshot assembled from
//! `AppState`, no session-specific data.
//!
//! Grounded in the teacher's dashboard-style handlers in `api/admin.rs`:
//! `State<AppState>` extraction, a plain `Json<..>` response, no request
//! body.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vrelay_sessions::SessionState;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_sessions: usize,
    pub sessions_by_tenant: HashMap<String, u32>,
    pub sessions_by_state: HashMap<String, usize>,
    #[serde(rename = "totalAudioBytesReceived")]
    pub total_audio_bytes_received: u64,
    #[serde(rename = "averageSessionDurationMs")]
    pub average_session_duration_ms: f64,
    pub uptime_secs: u64,
}

fn state_key(state: SessionState) -> &'static str {
    match state {
        SessionState::Connecting => "connecting",
        SessionState::Ready => "ready",
        SessionState::LearnerSpeaking => "learner_speaking",
        SessionState::AgentThinking => "agent_thinking",
        SessionState::AgentSpeaking => "agent_speaking",
        SessionState::Paused => "paused",
        SessionState::Ending => "ending",
        SessionState::Closed => "closed",
    }
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let sessions_by_tenant = state
        .supervisor
        .tenant_counts_snapshot()
        .into_iter()
        .map(|(tenant_id, count)| (tenant_id.as_str().to_string(), count))
        .collect();

    let mut sessions_by_state: HashMap<String, usize> = HashMap::new();
    let handles = state.supervisor.snapshot_handles();
    for handle in &handles {
        *sessions_by_state.entry(state_key(handle.state()).to_string()).or_insert(0) += 1;
    }

    // No historical store of ended-session durations exists in this core
    // (persistence is the REST layer's job, out of scope — spec.md §1); the
    // best this endpoint can report is the average age of sessions live
    // right now, which is what "average session duration" means for a
    // snapshot taken mid-flight.
    let average_session_duration_ms = if handles.is_empty() {
        0.0
    } else {
        let total: i64 = handles.iter().map(|h| h.session.lock().duration_ms()).sum();
        total as f64 / handles.len() as f64
    };

    Json(StatsResponse {
        active_sessions: state.supervisor.active_count(),
        sessions_by_tenant,
        sessions_by_state,
        total_audio_bytes_received: state.stats.total_audio_bytes_received.load(Ordering::Relaxed),
        average_session_duration_ms,
        uptime_secs: state.uptime_secs(),
    })
}
