// SPDX-License-Identifier: MIT
//! Persisted records: users and temperature readings.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ABSOLUTE_ZERO_CELSIUS: f32 = -273.15;
/// Roughly the core temperature of the sun.
pub const MAX_CELSIUS: f32 = 15_000_000.0;
pub const MAX_USER_NAME_LEN: usize = 100;

/// Time-ordered (UUIDv7) identifier, assigned once when a record is first stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A stored value together with its identity and optimistic-concurrency version.
///
/// Only a repository can create a `Record`, so `id` and `version` always reflect
/// what was actually persisted. Mutate through [`Record::value_mut`] and hand the
/// record back to the repository to update it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record<T> {
    id: EntityId,
    version: u64,
    value: T,
}

impl<T> Record<T> {
    pub(crate) fn new(id: EntityId, version: u64, value: T) -> Self {
        Self { id, version, value }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Behavior a value needs to be stored in a repository.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Checked on every insert and update.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Checked on update against the stored value; reject changes to immutable columns.
    fn check_update(&self, _stored: &Self) -> Result<(), String> {
        Ok(())
    }

    /// Key that must be unique among all stored values, if any.
    fn unique_key(&self) -> Option<&str> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Entity for User {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("user name must not be blank".into());
        }
        if self.name.chars().count() > MAX_USER_NAME_LEN {
            return Err(format!(
                "user name must be at most {MAX_USER_NAME_LEN} characters"
            ));
        }
        Ok(())
    }

    fn unique_key(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// A single temperature reading; neither field may change once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub timestamp: DateTime<Utc>,
    pub celsius: f32,
}

impl Temperature {
    pub fn new(timestamp: DateTime<Utc>, celsius: f32) -> Self {
        Self { timestamp, celsius }
    }

    pub fn now(celsius: f32) -> Self {
        Self::new(Utc::now(), celsius)
    }
}

impl Entity for Temperature {
    fn validate(&self) -> Result<(), String> {
        if !(ABSOLUTE_ZERO_CELSIUS..=MAX_CELSIUS).contains(&self.celsius) {
            return Err(format!(
                "temperature {} is outside [{ABSOLUTE_ZERO_CELSIUS}, {MAX_CELSIUS}]",
                self.celsius
            ));
        }
        Ok(())
    }

    fn check_update(&self, stored: &Self) -> Result<(), String> {
        if self.timestamp != stored.timestamp {
            return Err("temperature timestamp is not updatable".into());
        }
        if self.celsius.to_bits() != stored.celsius.to_bits() {
            return Err("temperature celsius is not updatable".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_time_ordered() {
        let ids: Vec<EntityId> = (0..256).map(|_| EntityId::generate()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids[0].as_uuid().get_version_num(), 7);
    }

    #[test]
    fn temperature_bounds() {
        assert!(Temperature::now(ABSOLUTE_ZERO_CELSIUS).validate().is_ok());
        assert!(Temperature::now(MAX_CELSIUS).validate().is_ok());
        assert!(Temperature::now(-300.0).validate().is_err());
        assert!(Temperature::now(f32::NAN).validate().is_err());
        assert!(Temperature::now(2.0e7).validate().is_err());
    }

    #[test]
    fn temperature_columns_are_immutable() {
        let stored = Temperature::now(21.5);
        let mut changed = stored.clone();
        assert!(changed.check_update(&stored).is_ok());
        changed.celsius = 22.0;
        assert!(changed.check_update(&stored).is_err());
    }

    #[test]
    fn user_name_rules() {
        assert!(User::new("alice").validate().is_ok());
        assert!(User::new("   ").validate().is_err());
        assert!(User::new("x".repeat(MAX_USER_NAME_LEN)).validate().is_ok());
        assert!(User::new("x".repeat(MAX_USER_NAME_LEN + 1)).validate().is_err());
    }
}
