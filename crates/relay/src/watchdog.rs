//! Heartbeat and watchdog (spec.md §4.8): two `tokio::time::interval`-driven
//! background sweeps over the supervisor's session map.
//!
//! Grounded in the periodic `tokio::spawn(async move { let mut interval =
//! ...; loop { interval.tick().await; ... } })` tasks `main.rs` spawns for
//! session-flush and stale-node pruning.

use std::time::Duration;

use chrono::Utc;

use vrelay_protocol::EndReason;

use crate::state::AppState;
use crate::supervisor::SessionCommand;

/// Start both background sweeps. Neither handle is tracked for graceful
/// shutdown (spec.md §4.7's shutdown only waits on session tasks) — they're
/// simply dropped along with the process.
pub fn spawn(state: AppState) {
    spawn_heartbeat(state.clone());
    spawn_watchdog(state);
}

fn spawn_heartbeat(state: AppState) {
    let interval_ms = state.config.relay.heartbeat_interval_ms.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            for handle in state.supervisor.snapshot_handles() {
                handle.send(SessionCommand::Heartbeat);
            }
        }
    });
}

fn spawn_watchdog(state: AppState) {
    let interval_ms = state.config.relay.watchdog_interval_ms.max(1);
    let inactivity_timeout_ms = state.config.relay.inactivity_timeout_ms as i64;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            sweep(&state, inactivity_timeout_ms);
        }
    });
}

/// One watchdog pass (spec.md §4.8): end sessions that have gone quiet past
/// `inactivity_timeout_ms`, or that have run past their own
/// `max_duration_ms`. Idempotent — sessions already ending/closed are
/// skipped, and sending `End` twice to the same session is harmless.
fn sweep(state: &AppState, inactivity_timeout_ms: i64) {
    let now = Utc::now();
    for handle in state.supervisor.snapshot_handles() {
        let (session_state, last_activity_at, started_at, max_duration_ms) = {
            let s = handle.session.lock();
            (s.state, s.last_activity_at, s.started_at, s.config.max_duration_ms as i64)
        };
        if session_state.is_terminal() {
            continue;
        }

        let inactive_for_ms = now.signed_duration_since(last_activity_at).num_milliseconds();
        let age_ms = now.signed_duration_since(started_at).num_milliseconds();
        if inactive_for_ms > inactivity_timeout_ms || age_ms > max_duration_ms {
            handle.send(SessionCommand::End(EndReason::Timeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use vrelay_domain::config::SessionConfig;
    use vrelay_domain::ids::{AgentId, LearnerId, SessionId, TenantId};
    use vrelay_sessions::Session;

    use crate::cancel::CancelToken;
    use crate::supervisor::Supervisor;

    use super::*;

    fn make_session(max_duration_ms: u64) -> Arc<Mutex<Session>> {
        let mut config = SessionConfig::default();
        config.max_duration_ms = max_duration_ms;
        Arc::new(Mutex::new(Session::new(
            SessionId::from("s1"),
            TenantId::from("t1"),
            LearnerId::from("l1"),
            AgentId::from("a1"),
            config,
            1024,
        )))
    }

    #[test]
    fn sweep_ends_session_past_max_duration() {
        let sup = Supervisor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = make_session(0); // already "expired" the instant it started
        sup.register(SessionId::from("s1"), TenantId::from("t1"), session, tx, CancelToken::new())
            .unwrap();

        sweep(
            &AppState {
                config: Arc::new(vrelay_domain::config::Config::default()),
                supervisor: Arc::new(sup),
                token_verifier: Arc::new(crate::auth::JwtTokenVerifier::new(String::new())),
                persistence: vrelay_domain::persistence::InMemoryPersistenceSink::shared(),
                assessor: Arc::new(vrelay_domain::assessor::NullAssessor),
                events: Arc::new(vrelay_domain::events::LoggingEventSink),
                stats: Arc::new(crate::state::ServerStats::default()),
                started_at: std::time::Instant::now(),
            },
            120_000,
        );

        let cmd = rx.try_recv().unwrap();
        assert!(matches!(cmd, SessionCommand::End(EndReason::Timeout)));
    }

    #[test]
    fn sweep_leaves_fresh_session_alone() {
        let sup = Supervisor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = make_session(1_800_000);
        sup.register(SessionId::from("s1"), TenantId::from("t1"), session, tx, CancelToken::new())
            .unwrap();

        sweep(
            &AppState {
                config: Arc::new(vrelay_domain::config::Config::default()),
                supervisor: Arc::new(sup),
                token_verifier: Arc::new(crate::auth::JwtTokenVerifier::new(String::new())),
                persistence: vrelay_domain::persistence::InMemoryPersistenceSink::shared(),
                assessor: Arc::new(vrelay_domain::assessor::NullAssessor),
                events: Arc::new(vrelay_domain::events::LoggingEventSink),
                stats: Arc::new(crate::state::ServerStats::default()),
                started_at: std::time::Instant::now(),
            },
            120_000,
        );

        assert!(rx.try_recv().is_err());
    }
}
