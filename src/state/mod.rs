//! State persistence layer
//!
//! Session snapshots, artifact repositories and user preferences.
//! In-memory backends serve development and tests; sessions and artifacts
//! can also be kept in Postgres.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::machine::FlowState;
use crate::session::{QaEntry, Session, SessionData};
use crate::Result;

pub mod postgres;
pub mod preferences;
pub mod repository;

pub use postgres::{PgRepository, PgSessionStore};
pub use preferences::{AbstractionPreference, InMemoryPreferencesStore, PreferencesStore};
pub use repository::{InMemoryRepository, Record, Repository};

/// Snapshot storage for one flow's sessions.
///
/// `save` accepts a snapshot only if it was derived from the latest stored
/// revision, so each session id has at most one writer.
#[async_trait]
pub trait SessionStore<S: FlowState, D: SessionData>: Send + Sync {
    async fn create(&self, session: Session<S, D>) -> Result<Session<S, D>>;
    async fn get(&self, session_id: Uuid) -> Result<Option<Session<S, D>>>;

    /// Persist `session` and return it with its revision bumped.
    async fn save(&self, session: Session<S, D>) -> Result<Session<S, D>>;

    async fn require(&self, session_id: Uuid) -> Result<Session<S, D>> {
        self.get(session_id)
            .await?
            .ok_or(GovernanceError::SessionNotFound(session_id))
    }

    async fn append_transcript(&self, session_id: Uuid, entry: QaEntry) -> Result<Session<S, D>> {
        let session = self.require(session_id).await?;
        self.save(session.with_entry(entry)).await
    }

    async fn update_state(&self, session_id: Uuid, state: S) -> Result<Session<S, D>> {
        let session = self.require(session_id).await?;
        self.save(session.with_state(state)).await
    }

    async fn increment_skip(&self, session_id: Uuid) -> Result<Session<S, D>> {
        let session = self.require(session_id).await?;
        self.save(session.with_skip()).await
    }

    async fn complete(&self, session_id: Uuid, output: Option<String>) -> Result<Session<S, D>> {
        let session = self.require(session_id).await?;
        self.save(session.completed_with(output)).await
    }

    async fn abandon(&self, session_id: Uuid) -> Result<Session<S, D>> {
        let session = self.require(session_id).await?;
        self.save(session.abandoned()).await
    }
}

/// Shared revision and closure rules for every backend.
pub(crate) fn check_writable<S: FlowState, D: SessionData>(
    stored: &Session<S, D>,
    incoming: &Session<S, D>,
) -> Result<()> {
    if stored.is_closed() {
        return Err(GovernanceError::SessionClosed(stored.session_id));
    }
    if stored.revision != incoming.revision {
        return Err(GovernanceError::ConcurrentModification(stored.session_id));
    }
    Ok(())
}

/// In-memory session store for development
pub struct InMemorySessionStore<S, D> {
    sessions: Arc<RwLock<HashMap<Uuid, Session<S, D>>>>,
}

impl<S, D> InMemorySessionStore<S, D> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<S, D> Default for InMemorySessionStore<S, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: FlowState, D: SessionData> SessionStore<S, D> for InMemorySessionStore<S, D> {
    async fn create(&self, session: Session<S, D>) -> Result<Session<S, D>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(GovernanceError::Validation(format!(
                "Session {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session<S, D>>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn save(&self, session: Session<S, D>) -> Result<Session<S, D>> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get(&session.session_id)
            .ok_or(GovernanceError::SessionNotFound(session.session_id))?;

        check_writable(stored, &session)?;

        let mut saved = session;
        saved.revision += 1;
        debug!(
            session_id = %saved.session_id,
            state = saved.state.label(),
            revision = saved.revision,
            "Session saved"
        );
        sessions.insert(saved.session_id, saved.clone());
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::QuickState;
    use crate::session::QuickData;
    use tokio_test::{assert_err, assert_ok};

    type Store = InMemorySessionStore<QuickState, QuickData>;

    #[tokio::test]
    async fn test_save_bumps_revision() {
        let store = Store::new();
        let session = store.create(Session::new(Uuid::new_v4())).await.unwrap();
        assert_eq!(session.revision, 0);

        let saved = store
            .save(session.with_state(QuickState::RoleContext))
            .await
            .unwrap();
        assert_eq!(saved.revision, 1);
        assert_eq!(
            store.require(saved.session_id).await.unwrap().state,
            QuickState::RoleContext
        );
    }

    #[tokio::test]
    async fn test_stale_writer_is_rejected() {
        let store = Store::new();
        let session = store.create(Session::new(Uuid::new_v4())).await.unwrap();

        assert_ok!(store.save(session.with_skip()).await);
        let err = assert_err!(store.save(session.with_state(QuickState::RoleContext)).await);
        assert!(matches!(err, GovernanceError::ConcurrentModification(_)));
    }

    #[tokio::test]
    async fn test_closed_sessions_are_frozen() {
        let store = Store::new();
        let session = store.create(Session::new(Uuid::new_v4())).await.unwrap();
        let abandoned = store.abandon(session.session_id).await.unwrap();
        assert!(abandoned.is_abandoned());

        let err = store
            .append_transcript(session.session_id, QaEntry::answered("role_context", "Q", "A", false))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::SessionClosed(_)));
        assert!(store.require(session.session_id).await.unwrap().transcript.is_empty());
    }

    #[tokio::test]
    async fn test_provided_operations() {
        let store = Store::new();
        let id = store.create(Session::new(Uuid::new_v4())).await.unwrap().session_id;

        assert_ok!(store.update_state(id, QuickState::ComfortWorkClarify).await);
        let skipped = assert_ok!(store.increment_skip(id).await);
        assert_eq!(skipped.skip_count, 1);

        let done = store.complete(id, Some("report".to_string())).await.unwrap();
        assert!(done.completed);
        assert_eq!(done.state, QuickState::Finalized);
        assert_eq!(done.output.as_deref(), Some("report"));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = Store::new();
        let err = assert_err!(store.require(Uuid::new_v4()).await);
        assert!(matches!(err, GovernanceError::SessionNotFound(_)));
    }
}
