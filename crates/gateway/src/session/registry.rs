//! Session registry: the 1:1 mapping from live connections to PTY sessions.
//!
//! The registry is the only state shared across connections. Map access is
//! lock-free per entry (DashMap); no map lock is ever held across a blocking
//! PTY operation, so unrelated sessions never serialize on each other.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use super::pty::{PtySession, SessionError, ShellSpec};

/// Opaque identity of one live transport connection.
///
/// Minted by the connection handler at accept time; the registry and the
/// handler reference it, the transport owns the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a fresh connection identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors from registry lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identity already has a session. A connection registers exactly
    /// once, so this is a programming invariant, not a client-facing error.
    #[error("connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    /// Spawning the session's shell failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Registry of live sessions, one per authenticated connection.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<PtySession>>,
    spec: ShellSpec,
}

impl SessionRegistry {
    /// Creates a registry that spawns sessions from `spec`.
    pub fn new(spec: ShellSpec) -> Self {
        Self {
            sessions: DashMap::new(),
            spec,
        }
    }

    /// Spawns a new PTY session and binds it to `id`.
    pub fn create_and_register(&self, id: ConnectionId) -> Result<Arc<PtySession>, RegistryError> {
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let session = Arc::new(PtySession::spawn(&self.spec)?);
        self.sessions.insert(id, Arc::clone(&session));

        tracing::info!(
            connection_id = %id,
            pid = ?session.pid(),
            active = self.count(),
            "registered session"
        );

        Ok(session)
    }

    /// Looks up the session bound to `id`.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<PtySession>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Closes and removes the session bound to `id`.
    ///
    /// Close-then-remove: the process must never outlive the registry entry
    /// once teardown runs to completion. No-op if `id` is absent, so the
    /// disconnect path and an error path may both invoke it.
    pub async fn teardown(&self, id: ConnectionId) {
        let Some(session) = self.get(id) else {
            return;
        };
        session.close().await;
        self.sessions.remove(&id);

        tracing::info!(connection_id = %id, active = self.count(), "tore down session");
    }

    /// Number of live sessions; read-only introspection for the health
    /// endpoint.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Closes every live session; called once at process shutdown.
    pub async fn shutdown_all(&self) {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.teardown(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> SessionRegistry {
        SessionRegistry::new(ShellSpec {
            program: "/bin/sh".to_string(),
            cwd: None,
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = test_registry();
        let id = ConnectionId::new();

        let session = registry.create_and_register(id).unwrap();
        assert!(session.is_running());
        assert_eq!(registry.count(), 1);
        assert!(registry.get(id).is_some());

        registry.teardown(id).await;
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = test_registry();
        let id = ConnectionId::new();

        registry.create_and_register(id).unwrap();
        let result = registry.create_and_register(id);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert_eq!(registry.count(), 1);

        registry.teardown(id).await;
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let registry = SessionRegistry::new(ShellSpec {
            program: "/nonexistent/shell/xyz".to_string(),
            cwd: None,
        });

        let result = registry.create_and_register(ConnectionId::new());
        assert!(matches!(
            result,
            Err(RegistryError::Session(SessionError::SpawnFailed(_)))
        ));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_removes_and_closes() {
        let registry = test_registry();
        let id = ConnectionId::new();

        let session = registry.create_and_register(id).unwrap();
        registry.teardown(id).await;

        assert_eq!(registry.count(), 0);
        assert!(registry.get(id).is_none());
        // teardown closed the session, not just dropped the entry
        let result = session
            .run_command("echo nope", std::time::Duration::from_millis(50))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let registry = test_registry();
        let id = ConnectionId::new();

        registry.create_and_register(id).unwrap();
        registry.teardown(id).await;
        registry.teardown(id).await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_unknown_id_is_noop() {
        let registry = test_registry();
        registry.teardown(ConnectionId::new()).await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = test_registry();
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();

        let s1 = registry.create_and_register(id1).unwrap();
        let s2 = registry.create_and_register(id2).unwrap();
        assert_eq!(registry.count(), 2);

        registry.teardown(id1).await;
        assert!(!s1.is_running());
        assert!(s2.is_running());
        assert_eq!(registry.count(), 1);

        registry.teardown(id2).await;
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let registry = test_registry();
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        registry.create_and_register(id1).unwrap();
        registry.create_and_register(id2).unwrap();

        registry.shutdown_all().await;
        assert_eq!(registry.count(), 0);
    }
}
