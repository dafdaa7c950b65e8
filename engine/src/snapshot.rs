//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory [`RowStore`](crate::RowStore)
//! and whatever file the runtime writes. They are designed for deterministic
//! serialization.

use crate::{error::Result, EntityName, Error, FieldMap, Generation, Model, ObjectId, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub id: ObjectId,
    pub values: FieldMap,
}

/// A point-in-time snapshot of the store.
///
/// Entities are kept in a BTreeMap and rows in insertion order, so the same
/// store always serializes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Model version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Generation of the latest commit included
    pub generation: Generation,
    /// Rows by entity, in insertion order
    pub entities: BTreeMap<EntityName, Vec<SnapshotRow>>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion, generation: Generation) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            generation,
            entities: BTreeMap::new(),
        }
    }

    /// Add a row to the snapshot.
    pub fn add_row(&mut self, entity: impl Into<EntityName>, id: ObjectId, values: FieldMap) {
        self.entities
            .entry(entity.into())
            .or_default()
            .push(SnapshotRow { id, values });
    }

    /// Count rows across all entities.
    pub fn row_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Validate the snapshot against a model.
    pub fn validate(&self, model: &Model) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported format version: {}",
                self.format_version
            )));
        }

        if self.schema_version != model.version {
            return Err(Error::SchemaVersionMismatch {
                expected: model.version,
                actual: self.schema_version,
            });
        }

        for (entity, rows) in &self.entities {
            let schema = model.entity(entity)?;
            for row in rows {
                schema.validate_fields(&row.values)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldDef, FieldType};
    use serde_json::json;

    fn test_model() -> Model {
        Model::new(1).with_entity(EntitySchema::new(
            "Task",
            vec![FieldDef::required("id", FieldType::String)],
        ))
    }

    fn row(id: &str) -> FieldMap {
        json!({ "id": id }).as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = StoreSnapshot::new(1, 0);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.row_count(), 0);
        assert!(snapshot.validate(&test_model()).is_ok());
    }

    #[test]
    fn schema_version_mismatch() {
        let snapshot = StoreSnapshot::new(2, 0);
        let result = snapshot.validate(&test_model());
        assert!(matches!(
            result,
            Err(Error::SchemaVersionMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn unknown_entity_rejected() {
        let mut snapshot = StoreSnapshot::new(1, 1);
        snapshot.add_row("Note", ObjectId::new(), row("1"));
        assert!(matches!(
            snapshot.validate(&test_model()),
            Err(Error::EntityNotFound(e)) if e == "Note"
        ));
    }

    #[test]
    fn invalid_row_rejected() {
        let mut snapshot = StoreSnapshot::new(1, 1);
        snapshot.add_row("Task", ObjectId::new(), FieldMap::new());
        assert!(matches!(
            snapshot.validate(&test_model()),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn deterministic_serialization() {
        let id_a = ObjectId::new();
        let id_b = ObjectId::new();

        let mut first = StoreSnapshot::new(1, 2);
        first.add_row("Task", id_a, row("a"));
        first.add_row("Task", id_b, row("b"));

        let mut second = StoreSnapshot::new(1, 2);
        second.add_row("Task", id_a, row("a"));
        second.add_row("Task", id_b, row("b"));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        let parsed = StoreSnapshot::from_json(&first.to_json().unwrap()).unwrap();
        assert_eq!(parsed, first);
    }
}
