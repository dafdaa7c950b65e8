//! Typed entities.
//!
//! A Rust type becomes a persisted entity by implementing [`Entity`]. Its
//! field mapping comes from its serde derive, so the field list is fixed at
//! compile time.

use crate::{
    error::Result, EntityName, Error, FieldMap, Predicate, DEFAULT_LOCAL_ID_KEY,
    DEFAULT_MARKED_FOR_LOCAL_DELETION_KEY, DEFAULT_MARKED_FOR_REMOTE_CHANGE_KEY,
    DEFAULT_MARKED_FOR_REMOTE_DELETION_KEY, DEFAULT_REMOTE_ID_KEY,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// A persisted record type.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use strata_engine::Entity;
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct Task {
///     id: String,
///     priority: i64,
/// }
///
/// impl Entity for Task {
///     const ENTITY_NAME: &'static str = "Task";
/// }
///
/// let task = Task { id: "1".into(), priority: 3 };
/// let fields = task.dictionary_value().unwrap();
/// assert_eq!(fields["priority"], 3);
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Stable name used for queries and event filtering.
    const ENTITY_NAME: &'static str;

    fn local_id_key() -> &'static str {
        DEFAULT_LOCAL_ID_KEY
    }

    fn remote_id_key() -> &'static str {
        DEFAULT_REMOTE_ID_KEY
    }

    fn marked_for_local_deletion_key() -> &'static str {
        DEFAULT_MARKED_FOR_LOCAL_DELETION_KEY
    }

    fn marked_for_remote_change_key() -> &'static str {
        DEFAULT_MARKED_FOR_REMOTE_CHANGE_KEY
    }

    fn marked_for_remote_deletion_key() -> &'static str {
        DEFAULT_MARKED_FOR_REMOTE_DELETION_KEY
    }

    fn entity_name() -> EntityName {
        Self::ENTITY_NAME.to_string()
    }

    /// The value's fields, keyed by field name.
    fn dictionary_value(&self) -> Result<FieldMap> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(other) => Err(Error::InvalidPayload(format!(
                "{} must serialize to an object, got {}",
                Self::ENTITY_NAME,
                other
            ))),
            Err(e) => Err(Error::InvalidPayload(e.to_string())),
        }
    }

    /// Build a value from stored fields.
    fn from_fields(fields: &FieldMap) -> Result<Self> {
        serde_json::from_value(Value::Object(fields.clone())).map_err(|e| Error::Decode {
            entity: Self::entity_name(),
            reason: e.to_string(),
        })
    }

    /// Predicate locating the row described by `values`.
    ///
    /// Matches on the local identity key. Returns `None` when `values` has no
    /// usable identity.
    fn identity_predicate(values: &FieldMap) -> Option<Predicate> {
        let key = Self::local_id_key();
        match values.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(Predicate::eq(key, value.clone())),
        }
    }
}

/// An entity the remote-sync layer can push and pull.
pub trait RemoteSyncable: Entity {
    /// Identifier of the row on the remote side.
    fn remote_id(&self) -> String;
}
