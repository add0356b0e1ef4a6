//! Per-flow abstraction-mode defaults

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::FlowKind;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbstractionPreference {
    pub abstraction_mode: bool,
    /// When set, the sensitivity gate is passed automatically.
    pub remember: bool,
}

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn get(&self, user_id: Uuid, flow: FlowKind) -> Result<Option<AbstractionPreference>>;
    async fn set(&self, user_id: Uuid, flow: FlowKind, preference: AbstractionPreference) -> Result<()>;

    /// The remembered choice, if the user asked for one.
    async fn remembered(&self, user_id: Uuid, flow: FlowKind) -> Result<Option<bool>> {
        Ok(self
            .get(user_id, flow)
            .await?
            .filter(|p| p.remember)
            .map(|p| p.abstraction_mode))
    }
}

#[derive(Default)]
pub struct InMemoryPreferencesStore {
    preferences: Arc<RwLock<HashMap<(Uuid, FlowKind), AbstractionPreference>>>,
}

impl InMemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferencesStore for InMemoryPreferencesStore {
    async fn get(&self, user_id: Uuid, flow: FlowKind) -> Result<Option<AbstractionPreference>> {
        let preferences = self.preferences.read().await;
        Ok(preferences.get(&(user_id, flow)).copied())
    }

    async fn set(&self, user_id: Uuid, flow: FlowKind, preference: AbstractionPreference) -> Result<()> {
        let mut preferences = self.preferences.write().await;
        preferences.insert((user_id, flow), preference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_remembered_choices_are_reused() {
        let store = InMemoryPreferencesStore::new();
        let user = Uuid::new_v4();

        store
            .set(user, FlowKind::Quick, AbstractionPreference { abstraction_mode: true, remember: false })
            .await
            .unwrap();
        assert_eq!(store.remembered(user, FlowKind::Quick).await.unwrap(), None);

        store
            .set(user, FlowKind::Quick, AbstractionPreference { abstraction_mode: true, remember: true })
            .await
            .unwrap();
        assert_eq!(store.remembered(user, FlowKind::Quick).await.unwrap(), Some(true));
        assert_eq!(store.remembered(user, FlowKind::Setup).await.unwrap(), None);
    }
}
