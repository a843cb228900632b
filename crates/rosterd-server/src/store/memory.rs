//! In-memory student store
//!
//! Backs the integration tests and `ROSTERD_STORE=memory` local runs.
//! Behaves like the Postgres store: upserts are keyed by external id, rows
//! without one always create a fresh record.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::import::row::{CodeBook, ValidRow};

use super::{GroupDirectory, PersistError, StudentStore, UpsertOutcome};

#[derive(Debug, Default)]
struct MemoryState {
    by_external_id: HashMap<String, Uuid>,
    records: HashMap<Uuid, ValidRow>,
}

/// In-process implementation of both collaborator traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: CodeBook,
    state: Mutex<MemoryState>,
    /// External ids whose writes fail, for exercising persistence errors.
    rejected_external_ids: HashSet<String>,
}

impl MemoryStore {
    pub fn new(codes: CodeBook) -> Self {
        Self {
            codes,
            state: Mutex::new(MemoryState::default()),
            rejected_external_ids: HashSet::new(),
        }
    }

    /// Convenience constructor seeding the code book from labels.
    pub fn with_groups(class_groups: &[&str], year_groups: &[&str]) -> Self {
        let mut codes = CodeBook::default();
        for label in class_groups {
            codes.class_groups.insert((*label).to_string(), Uuid::new_v4());
        }
        for label in year_groups {
            codes.year_groups.insert((*label).to_string(), Uuid::new_v4());
        }
        Self::new(codes)
    }

    /// Make every write for `external_id` fail with a constraint violation.
    pub fn reject_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.rejected_external_ids.insert(external_id.into());
        self
    }

    /// Number of distinct persisted records.
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn upsert_by_external_id(&self, row: &ValidRow) -> Result<UpsertOutcome, PersistError> {
        if let Some(ext) = &row.external_id {
            if self.rejected_external_ids.contains(ext) {
                return Err(PersistError::Conflict(format!(
                    "external id {} violates a store constraint",
                    ext
                )));
            }
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| PersistError::Store("store lock poisoned".to_string()))?;

        match &row.external_id {
            Some(ext) => {
                if let Some(&id) = state.by_external_id.get(ext) {
                    state.records.insert(id, row.clone());
                    Ok(UpsertOutcome { id, created: false })
                } else {
                    let id = Uuid::new_v4();
                    state.by_external_id.insert(ext.clone(), id);
                    state.records.insert(id, row.clone());
                    Ok(UpsertOutcome { id, created: true })
                }
            },
            None => {
                let id = Uuid::new_v4();
                state.records.insert(id, row.clone());
                Ok(UpsertOutcome { id, created: true })
            },
        }
    }
}

#[async_trait]
impl GroupDirectory for MemoryStore {
    async fn load_code_book(&self) -> Result<CodeBook, PersistError> {
        Ok(self.codes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_row(external_id: Option<&str>, store: &MemoryStore) -> ValidRow {
        let class_group_id = *store.codes.class_groups.values().next().unwrap();
        let year_group_id = *store.codes.year_groups.values().next().unwrap();
        ValidRow {
            external_id: external_id.map(str::to_string),
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            class_group: "7B".to_string(),
            class_group_id,
            year_group: "Y7".to_string(),
            year_group_id,
            guardian_email: "parent@example.org".to_string(),
        }
    }

    #[tokio::test]
    async fn repeated_external_id_updates_same_record() {
        let store = MemoryStore::with_groups(&["7B"], &["Y7"]);
        let row = valid_row(Some("S-1"), &store);

        let first = store.upsert_by_external_id(&row).await.unwrap();
        let second = store.upsert_by_external_id(&row).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn missing_external_id_always_creates() {
        let store = MemoryStore::with_groups(&["7B"], &["Y7"]);
        let row = valid_row(None, &store);

        let first = store.upsert_by_external_id(&row).await.unwrap();
        let second = store.upsert_by_external_id(&row).await.unwrap();

        assert!(first.created && second.created);
        assert_ne!(first.id, second.id);
        assert_eq!(store.record_count(), 2);
    }

    #[tokio::test]
    async fn rejected_external_id_surfaces_conflict() {
        let store = MemoryStore::with_groups(&["7B"], &["Y7"]).reject_external_id("S-9");
        let row = valid_row(Some("S-9"), &store);

        let err = store.upsert_by_external_id(&row).await.unwrap_err();
        assert!(matches!(err, PersistError::Conflict(_)));
    }
}
