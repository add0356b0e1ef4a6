//! Artifact repositories
//!
//! Problems, board members, bets, evidence, triggers and portfolio
//! versions outlive the session that produced them. Sessions only link
//! to them by id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::models::{Bet, BoardMember, EvidenceItem, PortfolioVersion, Problem, TriggerRecord};
use crate::Result;

pub trait Record: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn user_id(&self) -> Uuid;
    fn session_id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
}

#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn create(&self, record: T) -> Result<T>;
    async fn get(&self, id: Uuid) -> Result<Option<T>>;
    /// Replace an existing record.
    async fn update(&self, record: T) -> Result<T>;
    /// Oldest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<T>>;
    /// Oldest first.
    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<T>>;
}

pub struct InMemoryRepository<T> {
    records: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> InMemoryRepository<T> {
    async fn filtered(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let records = self.records.read().await;
        let mut items: Vec<T> = records.values().filter(|r| keep(r)).cloned().collect();
        items.sort_by_key(|r| r.created_at());
        items
    }
}

#[async_trait]
impl<T: Record> Repository<T> for InMemoryRepository<T> {
    async fn create(&self, record: T) -> Result<T> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id()) {
            return Err(GovernanceError::Validation(format!(
                "{} {} already exists",
                T::KIND,
                record.id()
            )));
        }
        records.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<T>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, record: T) -> Result<T> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id()) {
            Some(slot) => {
                *slot = record.clone();
                Ok(record)
            }
            None => Err(GovernanceError::NotFound(format!("{} {}", T::KIND, record.id()))),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<T>> {
        Ok(self.filtered(|r| r.user_id() == user_id).await)
    }

    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<T>> {
        Ok(self.filtered(|r| r.session_id() == session_id).await)
    }
}

macro_rules! impl_record {
    ($ty:ty, $kind:literal, $id:ident) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> Uuid {
                self.$id
            }

            fn user_id(&self) -> Uuid {
                self.user_id
            }

            fn session_id(&self) -> Uuid {
                self.session_id
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        }
    };
}

impl_record!(Problem, "problem", problem_id);
impl_record!(BoardMember, "board member", member_id);
impl_record!(Bet, "bet", bet_id);
impl_record!(EvidenceItem, "evidence", evidence_id);
impl_record!(TriggerRecord, "trigger", trigger_id);
impl_record!(PortfolioVersion, "portfolio version", version_id);
