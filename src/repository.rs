// SPDX-License-Identifier: MIT
//! Record storage with optimistic concurrency.
//!
//! A new record starts at version 0. An update is accepted only when the caller's
//! version matches the stored one, and then bumps it by exactly one; anything else
//! is a [`RepositoryError::Conflict`] and leaves the stored record untouched.
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use crate::entity::{Entity, EntityId, Record, User};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record {id} not found")]
    NotFound { id: EntityId },
    #[error("record {id} was modified concurrently (expected version {expected}, stored {actual})")]
    Conflict {
        id: EntityId,
        expected: u64,
        actual: u64,
    },
    #[error("unique key `{key}` already exists")]
    Duplicate { key: String },
    #[error("invalid record: {0}")]
    Invalid(String),
}

pub trait Repository<T: Entity>: Send + Sync {
    /// Store a new value, assigning its id and version 0.
    fn insert(&self, value: T) -> Result<Record<T>, RepositoryError>;

    /// Replace a stored value; returns the record with its new version.
    fn update(&self, record: Record<T>) -> Result<Record<T>, RepositoryError>;

    fn find_by_id(&self, id: EntityId) -> Option<Record<T>>;

    /// All records in creation order.
    fn find_all(&self) -> Vec<Record<T>>;

    fn count(&self) -> usize;

    fn delete(&self, id: EntityId) -> Result<(), RepositoryError>;
}

/// In-process store keyed by time-ordered ids.
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    records: RwLock<BTreeMap<EntityId, Record<T>>>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(
        records: &BTreeMap<EntityId, Record<T>>,
        value: &T,
        skip: Option<EntityId>,
    ) -> Result<(), RepositoryError> {
        let Some(key) = value.unique_key() else {
            return Ok(());
        };
        let taken = records.values().any(|record| {
            Some(record.id()) != skip && record.value().unique_key() == Some(key)
        });
        if taken {
            return Err(RepositoryError::Duplicate {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn insert(&self, value: T) -> Result<Record<T>, RepositoryError> {
        value.validate().map_err(RepositoryError::Invalid)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Self::check_unique(&records, &value, None)?;

        let record = Record::new(EntityId::generate(), 0, value);
        records.insert(record.id(), record.clone());
        Ok(record)
    }

    fn update(&self, record: Record<T>) -> Result<Record<T>, RepositoryError> {
        record.value().validate().map_err(RepositoryError::Invalid)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let id = record.id();
        let stored = records.get(&id).ok_or(RepositoryError::NotFound { id })?;
        if stored.version() != record.version() {
            return Err(RepositoryError::Conflict {
                id,
                expected: record.version(),
                actual: stored.version(),
            });
        }
        record
            .value()
            .check_update(stored.value())
            .map_err(RepositoryError::Invalid)?;
        Self::check_unique(&records, record.value(), Some(id))?;

        let updated = Record::new(id, record.version() + 1, record.into_value());
        records.insert(id, updated.clone());
        Ok(updated)
    }

    fn find_by_id(&self, id: EntityId) -> Option<Record<T>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn find_all(&self) -> Vec<Record<T>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn delete(&self, id: EntityId) -> Result<(), RepositoryError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound { id })
    }
}

/// Name lookups over any user repository. Plain variants are case sensitive.
pub trait UserRepository: Repository<User> {
    fn find_by_name(&self, name: &str) -> Option<Record<User>> {
        self.find_all()
            .into_iter()
            .find(|record| record.value().name == name)
    }

    fn find_by_name_containing(&self, fragment: &str) -> Vec<Record<User>> {
        self.find_all()
            .into_iter()
            .filter(|record| record.value().name.contains(fragment))
            .collect()
    }

    fn find_by_name_ignore_case(&self, name: &str) -> Vec<Record<User>> {
        let needle = name.to_lowercase();
        self.find_all()
            .into_iter()
            .filter(|record| record.value().name.to_lowercase() == needle)
            .collect()
    }

    fn find_by_name_ignore_case_containing(&self, fragment: &str) -> Vec<Record<User>> {
        let needle = fragment.to_lowercase();
        self.find_all()
            .into_iter()
            .filter(|record| record.value().name.to_lowercase().contains(&needle))
            .collect()
    }
}

impl<R> UserRepository for R where R: Repository<User> + ?Sized {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Temperature;

    fn names(records: &[Record<User>]) -> Vec<&str> {
        records.iter().map(|r| r.value().name.as_str()).collect()
    }

    #[test]
    fn insert_assigns_id_and_version_zero() {
        let repo = InMemoryRepository::new();
        let record = repo.insert(User::new("alice")).expect("insert");
        assert_eq!(record.version(), 0);
        assert_eq!(repo.find_by_id(record.id()), Some(record));
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn update_increments_version_exactly_once() {
        let repo = InMemoryRepository::new();
        let mut record = repo.insert(User::new("alice")).expect("insert");
        let id = record.id();

        record.value_mut().name = "alicia".into();
        let updated = repo.update(record).expect("update");
        assert_eq!(updated.id(), id);
        assert_eq!(updated.version(), 1);
        assert_eq!(repo.find_by_id(id).expect("stored").value().name, "alicia");
    }

    #[test]
    fn stale_update_is_rejected_and_store_untouched() {
        let repo = InMemoryRepository::new();
        let original = repo.insert(User::new("alice")).expect("insert");
        let mut first = original.clone();
        let mut second = original.clone();

        first.value_mut().name = "first".into();
        repo.update(first).expect("first writer wins");

        second.value_mut().name = "second".into();
        let err = repo.update(second).expect_err("stale version");
        assert_eq!(
            err,
            RepositoryError::Conflict {
                id: original.id(),
                expected: 0,
                actual: 1
            }
        );
        let stored = repo.find_by_id(original.id()).expect("stored");
        assert_eq!(stored.value().name, "first");
        assert_eq!(stored.version(), 1);
    }

    #[test]
    fn unique_names_are_enforced() {
        let repo = InMemoryRepository::new();
        repo.insert(User::new("alice")).expect("insert");
        let bob = repo.insert(User::new("bob")).expect("insert");
        assert!(matches!(
            repo.insert(User::new("alice")),
            Err(RepositoryError::Duplicate { .. })
        ));

        let mut renamed = bob;
        renamed.value_mut().name = "alice".into();
        assert!(matches!(
            repo.update(renamed),
            Err(RepositoryError::Duplicate { .. })
        ));
    }

    #[test]
    fn temperatures_are_immutable_once_stored() {
        let repo = InMemoryRepository::new();
        let mut record = repo.insert(Temperature::now(20.0)).expect("insert");
        record.value_mut().celsius = 25.0;
        assert!(matches!(repo.update(record), Err(RepositoryError::Invalid(_))));
        assert!(matches!(
            repo.insert(Temperature::now(-500.0)),
            Err(RepositoryError::Invalid(_))
        ));
    }

    #[test]
    fn missing_records() {
        let repo: InMemoryRepository<User> = InMemoryRepository::new();
        let record = repo.insert(User::new("alice")).expect("insert");
        repo.delete(record.id()).expect("delete");
        assert_eq!(
            repo.delete(record.id()),
            Err(RepositoryError::NotFound { id: record.id() })
        );
        assert!(matches!(
            repo.update(record),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn user_name_queries() {
        let repo = InMemoryRepository::new();
        for name in ["Alice", "alice", "Malice", "Bob"] {
            repo.insert(User::new(name)).expect("insert");
        }

        assert_eq!(
            repo.find_by_name("alice").map(|r| r.into_value().name),
            Some("alice".to_string())
        );
        assert!(repo.find_by_name("ALICE").is_none());
        assert_eq!(names(&repo.find_by_name_containing("Ali")), ["Alice"]);
        assert_eq!(
            names(&repo.find_by_name_containing("lice")),
            ["Alice", "alice", "Malice"]
        );
        assert_eq!(names(&repo.find_by_name_ignore_case("ALICE")), ["Alice", "alice"]);
        assert_eq!(
            names(&repo.find_by_name_ignore_case_containing("LICE")),
            ["Alice", "alice", "Malice"]
        );
    }

    #[test]
    fn find_all_preserves_creation_order() {
        let repo = InMemoryRepository::new();
        for name in ["c", "a", "b"] {
            repo.insert(User::new(name)).expect("insert");
        }
        assert_eq!(names(&repo.find_all()), ["c", "a", "b"]);
    }
}
