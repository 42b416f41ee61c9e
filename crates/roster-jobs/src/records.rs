//! Record store interface
//!
//! Employee storage itself lives outside this service; the pipeline only
//! needs the operations below. [`MemoryRecordStore`] is the in-process
//! implementation used by the runner binary and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{JobError, Result};

/// A stored employee record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub name: String,
    pub age: i64,
    pub position: String,
    pub salary: f64,
    pub created_at: DateTime<Utc>,
}

/// Fields for an employee about to be inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmployee {
    pub name: String,
    pub age: i64,
    pub position: String,
    pub salary: f64,
}

/// Downstream storage the workers write employee records into.
///
/// Names are unique across the store; how that is enforced is up to the
/// implementation, but bulk inserts must skip duplicates rather than fail.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a single record, returning the stored row.
    /// A duplicate name is an error here, unlike in [`Self::create_many`].
    async fn create(&self, record: NewEmployee) -> Result<Employee>;

    /// Bulk insert with duplicate-skip semantics.
    ///
    /// Rows whose name already exists (in the store or earlier in the same
    /// batch) are silently dropped; the return value is the number of rows
    /// actually inserted.
    async fn create_many(&self, records: &[NewEmployee]) -> Result<u64>;

    async fn find(&self, id: Uuid) -> Result<Option<Employee>>;

    /// Replace a record's fields, keeping its id and creation time.
    /// Returns `None` when the id does not exist.
    async fn update(&self, id: Uuid, record: NewEmployee) -> Result<Option<Employee>>;

    /// Returns whether a record was removed
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, Employee>,
    names: HashSet<String>,
}

/// In-memory [`RecordStore`] with the same name-uniqueness rule the bulk
/// insert path relies on for duplicate skipping
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    fail_creates: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, which is how tests drive the
    /// retry and dead-letter paths
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn all(&self) -> Vec<Employee> {
        let mut records: Vec<Employee> = self.lock().by_id.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.lock().names.contains(name)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(JobError::RecordStore(
                "record store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn insert_locked(inner: &mut Inner, record: NewEmployee) -> Employee {
        let employee = Employee {
            id: Uuid::new_v4(),
            name: record.name,
            age: record.age,
            position: record.position,
            salary: record.salary,
            created_at: Utc::now(),
        };
        inner.names.insert(employee.name.clone());
        inner.by_id.insert(employee.id, employee.clone());
        employee
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: NewEmployee) -> Result<Employee> {
        self.check_available()?;
        let mut inner = self.lock();
        if inner.names.contains(&record.name) {
            return Err(JobError::RecordStore(format!(
                "duplicate record name: {}",
                record.name
            )));
        }
        Ok(Self::insert_locked(&mut inner, record))
    }

    async fn create_many(&self, records: &[NewEmployee]) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.lock();
        let mut inserted = 0;
        for record in records {
            if inner.names.contains(&record.name) {
                continue;
            }
            Self::insert_locked(&mut inner, record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Employee>> {
        Ok(self.lock().by_id.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, record: NewEmployee) -> Result<Option<Employee>> {
        let mut inner = self.lock();
        let Some(existing) = inner.by_id.get(&id).cloned() else {
            return Ok(None);
        };
        if record.name != existing.name && inner.names.contains(&record.name) {
            return Err(JobError::RecordStore(format!(
                "duplicate record name: {}",
                record.name
            )));
        }
        inner.names.remove(&existing.name);
        inner.names.insert(record.name.clone());
        let updated = Employee {
            id,
            name: record.name,
            age: record.age,
            position: record.position,
            salary: record.salary,
            created_at: existing.created_at,
        };
        inner.by_id.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.lock();
        match inner.by_id.remove(&id) {
            Some(removed) => {
                inner.names.remove(&removed.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(name: &str) -> NewEmployee {
        NewEmployee {
            name: name.to_string(),
            age: 30,
            position: "Engineer".to_string(),
            salary: 85_000.0,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryRecordStore::new();
        let created = store.create(employee("Ada")).await.unwrap();
        let found = store.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Ada");
        assert_eq!(found.age, 30);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let store = MemoryRecordStore::new();
        store.create(employee("Ada")).await.unwrap();
        let result = store.create(employee("Ada")).await;
        assert!(matches!(result, Err(JobError::RecordStore(_))));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_create_many_skips_duplicates() {
        let store = MemoryRecordStore::new();
        store.create(employee("Ada")).await.unwrap();

        // "Ada" already exists and "Grace" appears twice in the batch.
        let batch = vec![employee("Ada"), employee("Grace"), employee("Grace")];
        let inserted = store.create_many(&batch).await.unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.count(), 2);
        assert!(store.contains_name("Grace"));
    }

    #[tokio::test]
    async fn test_update_replaces_fields() {
        let store = MemoryRecordStore::new();
        let created = store.create(employee("Ada")).await.unwrap();

        let updated = store
            .update(
                created.id,
                NewEmployee {
                    name: "Ada Lovelace".to_string(),
                    age: 36,
                    position: "Analyst".to_string(),
                    salary: 90_000.0,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "Ada Lovelace");
        assert_eq!(updated.created_at, created.created_at);
        assert!(!store.contains_name("Ada"));
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = MemoryRecordStore::new();
        let result = store.update(Uuid::new_v4(), employee("Ada")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryRecordStore::new();
        let created = store.create(employee("Ada")).await.unwrap();
        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert!(!store.contains_name("Ada"));
    }

    #[tokio::test]
    async fn test_fail_creates_switch() {
        let store = MemoryRecordStore::new();
        store.set_fail_creates(true);
        assert!(store.create(employee("Ada")).await.is_err());
        assert!(store.create_many(&[employee("Grace")]).await.is_err());

        store.set_fail_creates(false);
        assert!(store.create(employee("Ada")).await.is_ok());
    }
}
