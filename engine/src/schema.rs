//! Entity model definition and validation.
//!
//! The model names every persisted entity, declares its fields, and carries
//! the key conventions the sync layer relies on. Rows are validated against
//! their entity schema before a commit touches the store.

use crate::{error::Result, EntityName, Error, FieldMap, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Key names used for identity and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncKeys {
    /// Local identity field
    pub local_id: String,
    /// Remote identity field
    pub remote_id: String,
    /// Timestamp set when the row is soft-deleted locally
    pub marked_for_local_deletion: String,
    /// Flag set when the row has changes to push
    pub marked_for_remote_change: String,
    /// Flag set when the row must be deleted remotely
    pub marked_for_remote_deletion: String,
}

impl Default for SyncKeys {
    fn default() -> Self {
        Self {
            local_id: crate::DEFAULT_LOCAL_ID_KEY.to_string(),
            remote_id: crate::DEFAULT_REMOTE_ID_KEY.to_string(),
            marked_for_local_deletion: crate::DEFAULT_MARKED_FOR_LOCAL_DELETION_KEY.to_string(),
            marked_for_remote_change: crate::DEFAULT_MARKED_FOR_REMOTE_CHANGE_KEY.to_string(),
            marked_for_remote_deletion: crate::DEFAULT_MARKED_FOR_REMOTE_DELETION_KEY
                .to_string(),
        }
    }
}

/// Schema for one persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    /// Entity name, stable across queries and events
    pub name: EntityName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Identity and sync key names
    #[serde(default)]
    pub keys: SyncKeys,
}

impl EntitySchema {
    /// Create a new entity schema with the default key names.
    pub fn new(name: impl Into<EntityName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            keys: SyncKeys::default(),
        }
    }

    /// Override the key names.
    pub fn with_keys(mut self, keys: SyncKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Look up a field definition.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether rows of this entity can be soft-deleted.
    pub fn supports_soft_delete(&self) -> bool {
        self.field(&self.keys.marked_for_local_deletion).is_some()
    }

    /// Validate a row's fields against this schema.
    pub fn validate_fields(&self, fields: &FieldMap) -> Result<()> {
        for field in &self.fields {
            field.validate(fields.get(&field.name))?;
        }

        Ok(())
    }
}

/// Model for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Model version, checked when a store is reopened
    pub version: SchemaVersion,
    /// Entity schemas by name
    pub entities: HashMap<EntityName, EntitySchema>,
}

impl Model {
    /// Create a new, empty model.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            entities: HashMap::new(),
        }
    }

    /// Add an entity to the model.
    pub fn add_entity(&mut self, entity: EntitySchema) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Builder-style method to add an entity.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    /// Get an entity schema by name.
    pub fn entity(&self, name: &str) -> Result<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    /// Entity names in a stable order.
    pub fn entity_names(&self) -> Vec<&EntityName> {
        let mut names: Vec<_> = self.entities.keys().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_model() -> Model {
        Model::new(1).with_entity(EntitySchema::new(
            "Task",
            vec![
                FieldDef::required("id", FieldType::String),
                FieldDef::required("priority", FieldType::Int),
                FieldDef::optional("name", FieldType::String),
                FieldDef::optional("markedForDeletionDate", FieldType::Timestamp),
            ],
        ))
    }

    fn row(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn accepts_rows_with_and_without_optional_fields() {
        let model = test_model();
        let entity = model.entity("Task").unwrap();

        assert!(entity.validate_fields(&row(json!({"id": "1", "priority": 3}))).is_ok());
        assert!(entity
            .validate_fields(&row(json!({"id": "2", "priority": 9, "name": "ship"})))
            .is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let model = test_model();
        let entity = model.entity("Task").unwrap();

        let result = entity.validate_fields(&row(json!({"id": "1"})));

        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "priority"));
    }

    #[test]
    fn rejects_wrong_type() {
        let model = test_model();
        let entity = model.entity("Task").unwrap();

        let result = entity.validate_fields(&row(json!({"id": "1", "priority": "high"})));

        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "priority"));
    }

    #[test]
    fn null_counts_as_missing() {
        let model = test_model();
        let entity = model.entity("Task").unwrap();

        let result = entity.validate_fields(&row(json!({"id": null, "priority": 3})));

        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "id"));
    }

    #[test]
    fn missing_entity_schema() {
        let model = test_model();
        let result = model.entity("Note");
        assert!(matches!(result, Err(Error::EntityNotFound(e)) if e == "Note"));
    }

    #[test]
    fn default_sync_keys() {
        let keys = SyncKeys::default();
        assert_eq!(keys.local_id, "id");
        assert_eq!(keys.remote_id, "id");
        assert_eq!(keys.marked_for_local_deletion, "markedForDeletionDate");
        assert_eq!(keys.marked_for_remote_change, "markedForRemoteChange");
        assert_eq!(keys.marked_for_remote_deletion, "markedForRemoteDeletion");
    }

    #[test]
    fn soft_delete_support_follows_declared_field() {
        let model = test_model();
        assert!(model.entity("Task").unwrap().supports_soft_delete());

        let plain = EntitySchema::new("Note", vec![FieldDef::required("id", FieldType::String)]);
        assert!(!plain.supports_soft_delete());
    }

    #[test]
    fn model_serialization() {
        let model = test_model();
        let json = serde_json::to_string(&model).unwrap();
        let parsed: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(model, parsed);
    }

    #[test]
    fn keys_default_when_absent_from_json() {
        let json = r#"{"name": "Note", "fields": []}"#;
        let parsed: EntitySchema = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.keys, SyncKeys::default());
    }
}
