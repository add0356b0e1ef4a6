//! Postgres session store and artifact repositories
//!
//! One JSONB snapshot per session id. The row is locked while the
//! revision check runs so two writers cannot both win. Artifacts share a
//! single table keyed by record kind and id.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use super::repository::{Record, Repository};
use super::{check_writable, SessionStore};
use crate::error::GovernanceError;
use crate::machine::FlowState;
use crate::session::{Session, SessionData};
use crate::Result;

pub struct PgSessionStore<S, D> {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    _snapshot: PhantomData<fn() -> (S, D)>,
}

impl<S: FlowState, D: SessionData> PgSessionStore<S, D> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            _snapshot: PhantomData,
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS governance_sessions (
                      session_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      flow TEXT NOT NULL,
                      state TEXT NOT NULL,
                      revision BIGINT NOT NULL,
                      completed BOOLEAN NOT NULL DEFAULT FALSE,
                      snapshot JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_governance_sessions_user_flow
                    ON governance_sessions (user_id, flow, updated_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                GovernanceError::Database(format!("Failed to initialize session schema: {}", e))
            })?;

        Ok(())
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<Session<S, D>> {
        let Json(session) = row
            .try_get::<Json<Session<S, D>>, _>("snapshot")
            .map_err(|e| GovernanceError::Database(format!("Corrupt session snapshot: {}", e)))?;
        Ok(session)
    }
}

#[async_trait]
impl<S: FlowState, D: SessionData> SessionStore<S, D> for PgSessionStore<S, D> {
    async fn create(&self, session: Session<S, D>) -> Result<Session<S, D>> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO governance_sessions
              (session_id, user_id, flow, state, revision, completed, snapshot, updated_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(S::FLOW.as_str())
        .bind(session.state.label())
        .bind(session.revision as i64)
        .bind(session.completed)
        .bind(Json(&session))
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GovernanceError::Database(format!("Failed to create session: {}", e)))?;

        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session<S, D>>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT snapshot FROM governance_sessions WHERE session_id = $1 AND flow = $2")
            .bind(session_id)
            .bind(S::FLOW.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GovernanceError::Database(format!("Failed to load session: {}", e)))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn save(&self, session: Session<S, D>) -> Result<Session<S, D>> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            GovernanceError::Database(format!("Failed to begin session transaction: {}", e))
        })?;

        let row = sqlx::query(
            "SELECT snapshot FROM governance_sessions WHERE session_id = $1 AND flow = $2 FOR UPDATE",
        )
        .bind(session.session_id)
        .bind(S::FLOW.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| GovernanceError::Database(format!("Failed to lock session: {}", e)))?
        .ok_or(GovernanceError::SessionNotFound(session.session_id))?;

        let stored = Self::decode(&row)?;
        check_writable(&stored, &session)?;

        let mut saved = session;
        saved.revision += 1;

        sqlx::query(
            r#"
            UPDATE governance_sessions
            SET state = $2, revision = $3, completed = $4, snapshot = $5, updated_at = $6
            WHERE session_id = $1
            "#,
        )
        .bind(saved.session_id)
        .bind(saved.state.label())
        .bind(saved.revision as i64)
        .bind(saved.completed)
        .bind(Json(&saved))
        .bind(saved.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| GovernanceError::Database(format!("Failed to save session: {}", e)))?;

        tx.commit().await.map_err(|e| {
            GovernanceError::Database(format!("Failed to commit session transaction: {}", e))
        })?;

        debug!(
            session_id = %saved.session_id,
            state = saved.state.label(),
            revision = saved.revision,
            "Session saved"
        );
        Ok(saved)
    }
}

pub struct PgRepository<T> {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record + Serialize + DeserializeOwned> PgRepository<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            _record: PhantomData,
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS governance_records (
                      kind TEXT NOT NULL,
                      record_id UUID NOT NULL,
                      user_id UUID NOT NULL,
                      session_id UUID NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      body JSONB NOT NULL,
                      PRIMARY KEY (kind, record_id)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_governance_records_user
                    ON governance_records (kind, user_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                GovernanceError::Database(format!("Failed to initialize record schema: {}", e))
            })?;

        Ok(())
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<T> {
        let Json(record) = row
            .try_get::<Json<T>, _>("body")
            .map_err(|e| GovernanceError::Database(format!("Corrupt {} record: {}", T::KIND, e)))?;
        Ok(record)
    }

    async fn list_by(&self, column: &str, id: Uuid) -> Result<Vec<T>> {
        self.ensure_schema().await?;

        let sql = format!(
            "SELECT body FROM governance_records WHERE kind = $1 AND {} = $2 ORDER BY created_at",
            column
        );
        let rows = sqlx::query(&sql)
            .bind(T::KIND)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GovernanceError::Database(format!("Failed to list {} records: {}", T::KIND, e))
            })?;

        rows.iter().map(Self::decode).collect()
    }
}

#[async_trait]
impl<T: Record + Serialize + DeserializeOwned> Repository<T> for PgRepository<T> {
    async fn create(&self, record: T) -> Result<T> {
        self.ensure_schema().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO governance_records
              (kind, record_id, user_id, session_id, created_at, body)
            VALUES
              ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kind, record_id) DO NOTHING
            "#,
        )
        .bind(T::KIND)
        .bind(record.id())
        .bind(record.user_id())
        .bind(record.session_id())
        .bind(record.created_at())
        .bind(Json(&record))
        .execute(&self.pool)
        .await
        .map_err(|e| GovernanceError::Database(format!("Failed to create {}: {}", T::KIND, e)))?;

        if inserted.rows_affected() == 0 {
            return Err(GovernanceError::Validation(format!(
                "{} {} already exists",
                T::KIND,
                record.id()
            )));
        }
        debug!(kind = T::KIND, id = %record.id(), "Record created");
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<T>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT body FROM governance_records WHERE kind = $1 AND record_id = $2")
            .bind(T::KIND)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GovernanceError::Database(format!("Failed to load {}: {}", T::KIND, e)))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn update(&self, record: T) -> Result<T> {
        self.ensure_schema().await?;

        let updated = sqlx::query(
            "UPDATE governance_records SET body = $3 WHERE kind = $1 AND record_id = $2",
        )
        .bind(T::KIND)
        .bind(record.id())
        .bind(Json(&record))
        .execute(&self.pool)
        .await
        .map_err(|e| GovernanceError::Database(format!("Failed to update {}: {}", T::KIND, e)))?;

        if updated.rows_affected() == 0 {
            return Err(GovernanceError::NotFound(format!("{} {}", T::KIND, record.id())));
        }
        Ok(record)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<T>> {
        self.list_by("user_id", user_id).await
    }

    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<T>> {
        self.list_by("session_id", session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bet;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;
    use tokio_test::assert_err;

    fn unreachable_pool() -> PgPool {
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(300))
            .connect_lazy("postgres://governance@127.0.0.1:1/governance")
            .unwrap()
    }

    #[tokio::test]
    async fn test_repository_reports_database_errors() {
        let repo = PgRepository::<Bet>::new(unreachable_pool());
        let bet = Bet::new(Uuid::new_v4(), Uuid::new_v4(), "Ship v2 by March", "v2 slips past March", 90);

        let err = assert_err!(repo.create(bet.clone()).await);
        assert!(matches!(err, GovernanceError::Database(_)));
        let err = assert_err!(repo.list_for_user(bet.user_id).await);
        assert!(matches!(err, GovernanceError::Database(_)));
    }
}
