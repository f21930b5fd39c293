//! Session supervisor (spec.md §4.7): admission, the two process-wide maps,
//! and graceful shutdown.
//!
//! Grounded in `sa_gateway::nodes::registry::NodeRegistry` (a
//! `parking_lot::RwLock<HashMap<..>>` registry with register/remove) and
//! `sa_gateway::runtime::quota::QuotaTracker` (per-key usage vs. limit,
//! generalized here from per-agent daily tokens to per-tenant concurrent
//! sessions).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vrelay_domain::assessor::AssessmentResult;
use vrelay_domain::error::{Error, Result};
use vrelay_domain::ids::{SessionId, TenantId, TurnId};
use vrelay_protocol::EndReason;
use vrelay_sessions::{Session, SessionState};

use crate::cancel::CancelToken;

/// Command mailbox for a running session task (spec.md §5: "all external
/// events ... are serialized messages to that task").
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Heartbeat/watchdog asks the relay task to push a protocol ping.
    Heartbeat,
    /// Watchdog, supervisor shutdown, or a client `session.stop` asks the
    /// relay task to begin a graceful end.
    End(EndReason),
    /// A spawned `PronunciationAssessor::assess` call finished. Routed back
    /// through the mailbox so only the owning task ever mutates `Session`.
    AssessmentComplete {
        turn_id: TurnId,
        result: std::result::Result<AssessmentResult, String>,
    },
}

/// Everything the supervisor and other server-wide tasks (watchdog, stats)
/// need about a live session, without touching its internals directly.
pub struct SessionHandle {
    pub tenant_id: TenantId,
    pub session: Arc<Mutex<Session>>,
    pub cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    pub cancel: CancelToken,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.session.lock().state
    }

    pub fn send(&self, cmd: SessionCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

#[derive(Default)]
pub struct Supervisor {
    active: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    tenant_counts: RwLock<HashMap<TenantId, u32>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission check at upgrade time (spec.md §4.7, §8 boundary
    /// behaviors): the tenant's current concurrent-session count must be
    /// strictly below `max`.
    pub fn check_quota(&self, tenant_id: &TenantId, max: u32) -> Result<()> {
        let current = self.tenant_counts.read().get(tenant_id).copied().unwrap_or(0);
        if current >= max {
            return Err(Error::TenantOverQuota {
                tenant_id: tenant_id.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Register a newly constructed session (spec.md §4.7: reject
    /// duplicates with `SESSION_ALREADY_ACTIVE`).
    pub fn register(
        &self,
        session_id: SessionId,
        tenant_id: TenantId,
        session: Arc<Mutex<Session>>,
        cmd_tx: mpsc::UnboundedSender<SessionCommand>,
        cancel: CancelToken,
    ) -> Result<Arc<SessionHandle>> {
        let mut active = self.active.write();
        if active.contains_key(&session_id) {
            return Err(Error::SessionAlreadyActive {
                session_id: session_id.as_str().to_string(),
            });
        }

        let handle = Arc::new(SessionHandle {
            tenant_id: tenant_id.clone(),
            session,
            cmd_tx,
            cancel,
        });
        active.insert(session_id, handle.clone());
        *self.tenant_counts.write().entry(tenant_id).or_insert(0) += 1;
        Ok(handle)
    }

    /// Remove a session from both maps (called once the relay task
    /// finishes unwinding). Idempotent.
    pub fn remove(&self, session_id: &SessionId) {
        let removed = self.active.write().remove(session_id);
        if let Some(handle) = removed {
            let mut counts = self.tenant_counts.write();
            if let Some(count) = counts.get_mut(&handle.tenant_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&handle.tenant_id);
                }
            }
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.active.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.active.read().contains_key(session_id)
    }

    pub fn tenant_count(&self, tenant_id: &TenantId) -> u32 {
        self.tenant_counts.read().get(tenant_id).copied().unwrap_or(0)
    }

    /// Snapshot of every tenant's current concurrent-session count, for
    /// `GET /ws/stats` (spec.md §4.9).
    pub fn tenant_counts_snapshot(&self) -> HashMap<TenantId, u32> {
        self.tenant_counts.read().clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn snapshot_handles(&self) -> Vec<Arc<SessionHandle>> {
        self.active.read().values().cloned().collect()
    }

    /// Track the relay task's join handle so graceful shutdown can await it.
    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Graceful shutdown (spec.md §4.7): end every active session, then
    /// wait for every session task's side effects (summary emission,
    /// persistence) to complete before returning.
    pub async fn shutdown(&self) {
        for handle in self.snapshot_handles() {
            handle.send(SessionCommand::End(EndReason::Completed));
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrelay_domain::config::SessionConfig;
    use vrelay_domain::ids::{AgentId, LearnerId};

    fn make_session(id: &str) -> Arc<Mutex<Session>> {
        Arc::new(Mutex::new(Session::new(
            SessionId::from(id),
            TenantId::from("t1"),
            LearnerId::from("l1"),
            AgentId::from("a1"),
            SessionConfig::default(),
            1024,
        )))
    }

    #[test]
    fn quota_blocks_at_max() {
        let sup = Supervisor::new();
        let tenant = TenantId::from("t1");
        for i in 0..2 {
            sup.check_quota(&tenant, 2).unwrap();
            let (tx, _rx) = mpsc::unbounded_channel();
            sup.register(
                SessionId::from(format!("s{i}")),
                tenant.clone(),
                make_session(&format!("s{i}")),
                tx,
                CancelToken::new(),
            )
            .unwrap();
        }
        assert_eq!(sup.tenant_count(&tenant), 2);
        assert!(sup.check_quota(&tenant, 2).is_err());
    }

    #[test]
    fn duplicate_session_id_rejected() {
        let sup = Supervisor::new();
        let tenant = TenantId::from("t1");
        let (tx, _rx) = mpsc::unbounded_channel();
        sup.register(
            SessionId::from("dup"),
            tenant.clone(),
            make_session("dup"),
            tx,
            CancelToken::new(),
        )
        .unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let err = sup
            .register(
                SessionId::from("dup"),
                tenant,
                make_session("dup"),
                tx2,
                CancelToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_ALREADY_ACTIVE");
    }

    #[test]
    fn remove_decrements_tenant_count() {
        let sup = Supervisor::new();
        let tenant = TenantId::from("t1");
        let (tx, _rx) = mpsc::unbounded_channel();
        sup.register(
            SessionId::from("s1"),
            tenant.clone(),
            make_session("s1"),
            tx,
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(sup.tenant_count(&tenant), 1);

        sup.remove(&SessionId::from("s1"));
        assert_eq!(sup.tenant_count(&tenant), 0);
        assert!(!sup.contains(&SessionId::from("s1")));
    }

    #[test]
    fn remove_is_idempotent() {
        let sup = Supervisor::new();
        sup.remove(&SessionId::from("ghost"));
        sup.remove(&SessionId::from("ghost"));
    }

    #[tokio::test]
    async fn shutdown_sends_end_to_every_session() {
        let sup = Supervisor::new();
        let tenant = TenantId::from("t1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        sup.register(
            SessionId::from("s1"),
            tenant,
            make_session("s1"),
            tx,
            CancelToken::new(),
        )
        .unwrap();

        sup.shutdown().await;
        let cmd = rx.recv().await.unwrap();
        assert!(matches!(cmd, SessionCommand::End(EndReason::Completed)));
    }
}
