//! # Strata Engine
//!
//! The pure core of an object-persistence coordination layer.
//!
//! This crate holds everything about cached objects, pending changes and
//! change propagation that can be expressed without threads or IO. The
//! `strata-runtime` crate puts it behind serialized contexts.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, tasks or locks
//! - **Deterministic**: the same commits produce the same store and events
//! - **Testable**: every piece runs in a plain unit test
//!
//! ## Core Concepts
//!
//! ### Row store
//!
//! [`RowStore`] holds committed rows. Every commit is atomic and produces a
//! new [`Generation`]; readers pinned to an older generation keep seeing the
//! rows as they were.
//!
//! ### Object graph
//!
//! Each context owns an [`ObjectGraph`]: its identity cache and its pending
//! changes. At most one [`ManagedObject`] is registered per row. Committing
//! the graph yields a [`SaveEvent`], which sibling graphs merge under their
//! [`MergePolicy`].
//!
//! ### Observation
//!
//! An [`ObservationFilter`] accumulates `entity AND predicate` registrations
//! and reduces a [`SaveEvent`] to the [`ContextUpdate`] an observer cares
//! about.
//!
//! ## Quick Start
//!
//! ```rust
//! use strata_engine::{
//!     ContextId, EntitySchema, FetchRequest, FieldDef, FieldType, MergePolicy, Model,
//!     ObjectGraph, Predicate, RowStore,
//! };
//! use serde_json::json;
//!
//! // 1. Define a model
//! let model = Model::new(1).with_entity(EntitySchema::new(
//!     "Task",
//!     vec![
//!         FieldDef::required("id", FieldType::String),
//!         FieldDef::optional("priority", FieldType::Int),
//!     ],
//! ));
//!
//! // 2. Create a store and a graph reading from it
//! let mut store = RowStore::new(model);
//! let mut graph = ObjectGraph::new(ContextId::new(), store.generation(), MergePolicy::Overwrite);
//!
//! // 3. Insert and commit
//! let values = json!({"id": "1", "priority": 9}).as_object().cloned().unwrap();
//! graph.insert(&store, "Task", values).unwrap();
//! let event = graph.commit(&mut store).unwrap().unwrap();
//! assert_eq!(event.inserted.len(), 1);
//!
//! // 4. Query
//! let request = FetchRequest::new("Task").with_predicate(Predicate::gt("priority", 5));
//! let results = graph.fetch(&store, &request).unwrap();
//! assert_eq!(results.len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`RowStore::export_state`] and [`RowStore::from_snapshot`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod entity;
pub mod error;
pub mod event;
pub mod graph;
pub mod object;
pub mod observe;
pub mod predicate;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use entity::{Entity, RemoteSyncable};
pub use error::Error;
pub use event::{ChangeKind, ContextUpdate, SaveEvent};
pub use graph::{FetchRequest, MergePolicy, ObjectGraph, SortDescriptor};
pub use object::{ContextId, ManagedObject, ObjectId, ObjectSnapshot, ObjectState};
pub use observe::ObservationFilter;
pub use predicate::{CompareOp, Evaluate, Predicate};
pub use schema::{EntitySchema, FieldDef, FieldType, Model, SyncKeys};
pub use snapshot::{SnapshotRow, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{RowChange, RowStore, Table};

/// Type aliases for clarity
pub type EntityName = String;
pub type FieldMap = serde_json::Map<String, serde_json::Value>;
pub type Generation = u64;
pub type SchemaVersion = u32;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

pub const DEFAULT_LOCAL_ID_KEY: &str = "id";
pub const DEFAULT_REMOTE_ID_KEY: &str = "id";
pub const DEFAULT_MARKED_FOR_LOCAL_DELETION_KEY: &str = "markedForDeletionDate";
pub const DEFAULT_MARKED_FOR_REMOTE_CHANGE_KEY: &str = "markedForRemoteChange";
pub const DEFAULT_MARKED_FOR_REMOTE_DELETION_KEY: &str = "markedForRemoteDeletion";

/// How long a soft-deleted row is kept before it may be removed.
pub const DELETION_RETENTION_SECS: u64 = 120;
