//! Managed objects and their identities.

use crate::{EntityName, Evaluate, FieldMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Identity of a persisted row. Stable across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of an object inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    /// Inserted in this context, not yet committed
    Inserted,
    /// Matches the committed row as far as this context knows
    Clean,
    /// Has local changes not yet committed
    Updated,
    /// Deleted in this context, not yet committed
    Deleted,
}

/// A live object registered in one context.
///
/// An object is either a fault (identity only, fields not loaded) or
/// materialized. Faults are filled in from the store on first access.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    id: ObjectId,
    entity: EntityName,
    values: Option<FieldMap>,
    changed: BTreeSet<String>,
    state: ObjectState,
}

impl ManagedObject {
    /// A freshly inserted object.
    pub(crate) fn inserted(id: ObjectId, entity: EntityName, values: FieldMap) -> Self {
        let changed = values.keys().cloned().collect();
        Self {
            id,
            entity,
            values: Some(values),
            changed,
            state: ObjectState::Inserted,
        }
    }

    /// An object registered from a fetched row.
    pub(crate) fn fetched(id: ObjectId, entity: EntityName, values: Option<FieldMap>) -> Self {
        Self {
            id,
            entity,
            values,
            changed: BTreeSet::new(),
            state: ObjectState::Clean,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    /// Fields, if the object is materialized.
    pub fn values(&self) -> Option<&FieldMap> {
        self.values.as_ref()
    }

    /// Keys changed in this context since the last commit.
    pub fn changed_keys(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn is_fault(&self) -> bool {
        self.values.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.state == ObjectState::Deleted
    }

    pub fn has_changes(&self) -> bool {
        self.state != ObjectState::Clean
    }

    pub(crate) fn fill(&mut self, values: FieldMap) {
        if self.values.is_none() {
            self.values = Some(values);
        }
    }

    /// Apply a field patch. Returns whether anything changed.
    pub(crate) fn apply_patch(&mut self, patch: FieldMap) -> bool {
        let values = self.values.get_or_insert_with(FieldMap::new);
        let mut modified = false;

        // An absent field and an explicit null are the same value.
        for (key, value) in patch {
            if values.get(&key).unwrap_or(&serde_json::Value::Null) != &value {
                values.insert(key.clone(), value);
                self.changed.insert(key);
                modified = true;
            }
        }

        if modified && self.state == ObjectState::Clean {
            self.state = ObjectState::Updated;
        }
        modified
    }

    /// Overwrite a field from outside this context without marking it dirty.
    pub(crate) fn absorb(&mut self, key: &str, value: serde_json::Value) {
        if let Some(values) = self.values.as_mut() {
            values.insert(key.to_string(), value);
        }
        self.changed.remove(key);
        if self.changed.is_empty() && self.state == ObjectState::Updated {
            self.state = ObjectState::Clean;
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = ObjectState::Deleted;
    }

    /// Replace the fields with a freshly committed row.
    pub(crate) fn reload(&mut self, values: FieldMap) {
        self.values = Some(values);
        self.mark_clean();
    }

    pub(crate) fn mark_clean(&mut self) {
        self.changed.clear();
        self.state = ObjectState::Clean;
    }

    /// Immutable copy of the object's current fields.
    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            id: self.id,
            entity: self.entity.clone(),
            values: self.values.clone().unwrap_or_default(),
            changed: self.changed.clone(),
        }
    }
}

impl Evaluate for ManagedObject {
    fn entity_name(&self) -> &str {
        &self.entity
    }

    fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.as_ref().and_then(|v| v.get(key))
    }
}

/// Immutable, context-free copy of an object's fields.
///
/// Snapshots are what crosses context boundaries: in save events, in fetch
/// results handed back to callers, and in observer deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    /// Row identity
    pub id: ObjectId,
    /// Entity name
    pub entity: EntityName,
    /// All known fields
    pub values: FieldMap,
    /// Keys changed by the commit that produced this snapshot
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changed: BTreeSet<String>,
}

impl ObjectSnapshot {
    pub fn new(id: ObjectId, entity: impl Into<EntityName>, values: FieldMap) -> Self {
        Self {
            id,
            entity: entity.into(),
            values,
            changed: BTreeSet::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

impl Evaluate for ObjectSnapshot {
    fn entity_name(&self) -> &str {
        &self.entity
    }

    fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}
