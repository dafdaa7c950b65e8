//! Store coordinator and store bootstrap.
//!
//! The coordinator owns the committed rows, the event bus and the delivery
//! queue. Every context of a store shares one coordinator; the coordinator
//! never holds contexts, so contexts and their workers can be dropped freely.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use dashmap::DashMap;
use strata_engine::{
    ContextId, Generation, MergePolicy, Model, ObjectGraph, RowStore, SaveEvent, StoreSnapshot,
};
use tempfile::NamedTempFile;

use crate::bus::EventBus;
use crate::context::{Context, ContextKind};
use crate::error::Result;
use crate::observer::DeliveryQueue;

/// Where a store keeps its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    InMemory,
    /// JSON snapshot file, rewritten after every commit
    File(PathBuf),
}

/// State shared by every context of one store.
#[derive(Debug)]
pub struct StoreCoordinator {
    model: Model,
    store: RwLock<RowStore>,
    location: StoreLocation,
    bus: Arc<EventBus>,
    delivery: DeliveryQueue,
    /// Generation each live context reads at
    readers: DashMap<ContextId, Generation>,
}

impl StoreCoordinator {
    fn new(store: RowStore, location: StoreLocation) -> Self {
        Self {
            model: store.model().clone(),
            store: RwLock::new(store),
            location,
            bus: EventBus::new_shared(),
            delivery: DeliveryQueue::spawn(),
            readers: DashMap::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn delivery(&self) -> &DeliveryQueue {
        &self.delivery
    }

    /// Generation of the latest commit.
    pub fn generation(&self) -> Generation {
        self.read().generation()
    }

    /// Number of contexts whose workers are still running.
    pub fn live_contexts(&self) -> usize {
        self.readers.len()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RowStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new reader at the latest generation.
    pub(crate) fn register_reader(&self, context: ContextId) -> Generation {
        let store = self.read();
        let generation = store.generation();
        self.readers.insert(context, generation);
        generation
    }

    pub(crate) fn advance_reader(&self, context: ContextId, generation: Generation) {
        self.readers.insert(context, generation);
    }

    pub(crate) fn release_reader(&self, context: &ContextId) {
        self.readers.remove(context);
    }

    /// Commit a graph's pending changes and publish the resulting event.
    ///
    /// The event is published after the store lock is released.
    pub(crate) fn commit(
        &self,
        graph: &mut ObjectGraph,
    ) -> std::result::Result<Option<Arc<SaveEvent>>, strata_engine::Error> {
        let event = {
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            let Some(event) = graph.commit(&mut store)? else {
                return Ok(None);
            };

            self.readers.insert(graph.context_id(), graph.generation());
            let oldest = self
                .readers
                .iter()
                .map(|entry| *entry.value())
                .min()
                .unwrap_or(event.generation);
            store.compact(oldest);

            self.persist(&store);
            Arc::new(event)
        };

        tracing::info!(
            context = %event.origin,
            generation = event.generation,
            inserted = event.inserted.len(),
            updated = event.updated.len(),
            deleted = event.deleted.len(),
            "Committed changes"
        );

        self.bus.publish(Arc::clone(&event));
        Ok(Some(event))
    }

    fn persist(&self, store: &RowStore) {
        let StoreLocation::File(path) = &self.location else {
            return;
        };

        if let Err(e) = write_snapshot(path, &store.export_state()) {
            tracing::error!(
                path = %path.display(),
                generation = store.generation(),
                "Failed to persist store snapshot: {}",
                e
            );
        }
    }
}

/// Write a snapshot atomically next to its final location.
fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(snapshot.to_json()?.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path)?;

    Ok(())
}

fn load_snapshot(path: &Path, model: &Model) -> Result<RowStore> {
    let text = std::fs::read_to_string(path)?;
    let snapshot = StoreSnapshot::from_json(&text)?;
    Ok(RowStore::from_snapshot(model.clone(), snapshot)?)
}

/// An open store: its coordinator plus the root context.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    coordinator: Arc<StoreCoordinator>,
    root: Context,
}

impl StoreHandle {
    /// Open the store at `location`, creating it if needed.
    ///
    /// A file that cannot be read or was written for another model is
    /// destroyed and recreated. If the location cannot be written at all the
    /// store falls back to memory. Neither case is an error for the caller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(location: StoreLocation, model: Model) -> Self {
        let path = match location {
            StoreLocation::InMemory => return Self::in_memory(model),
            StoreLocation::File(path) => path,
        };

        let store = if path.exists() {
            match load_snapshot(&path, &model) {
                Ok(store) => {
                    tracing::info!(
                        path = %path.display(),
                        generation = store.generation(),
                        rows = store.len(),
                        "Opened store"
                    );
                    store
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Store is unusable, recreating: {}", e);
                    if let Err(e) = Self::destroy(&path) {
                        tracing::warn!(path = %path.display(), "Failed to destroy store: {}", e);
                    }
                    RowStore::new(model)
                }
            }
        } else {
            RowStore::new(model)
        };

        if let Err(e) = write_snapshot(&path, &store.export_state()) {
            tracing::warn!(
                path = %path.display(),
                "Store location is not writable, keeping the store in memory: {}",
                e
            );
            return Self::with_store(store, StoreLocation::InMemory);
        }

        Self::with_store(store, StoreLocation::File(path))
    }

    /// Create an empty store that lives in memory only.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn in_memory(model: Model) -> Self {
        Self::with_store(RowStore::new(model), StoreLocation::InMemory)
    }

    fn with_store(store: RowStore, location: StoreLocation) -> Self {
        let coordinator = Arc::new(StoreCoordinator::new(store, location));
        let root = Context::spawn(
            Arc::clone(&coordinator),
            ContextKind::Root,
            MergePolicy::Overwrite,
        );

        Self { coordinator, root }
    }

    /// Remove the store file at `path`. A missing file is not an error.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => {
                tracing::info!(path = %path.as_ref().display(), "Destroyed store");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.coordinator
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.coordinator.bus()
    }

    /// The store's root context.
    pub fn root_context(&self) -> &Context {
        &self.root
    }

    /// A new background context with its own worker.
    pub fn new_background_context(&self) -> Context {
        self.root.create_derived_context()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_engine::{EntitySchema, FieldDef, FieldType};

    fn test_model() -> Model {
        Model::new(1).with_entity(EntitySchema::new(
            "Task",
            vec![FieldDef::required("id", FieldType::String)],
        ))
    }

    #[test]
    fn test_write_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = RowStore::new(test_model());

        write_snapshot(&path, &store.export_state()).unwrap();
        let loaded = load_snapshot(&path, &test_model()).unwrap();
        assert_eq!(loaded.generation(), 0);
    }

    #[test]
    fn test_load_rejects_other_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        write_snapshot(&path, &RowStore::new(test_model()).export_state()).unwrap();

        let mut other = test_model();
        other.version = 2;
        assert!(load_snapshot(&path, &other).is_err());
    }

    #[test]
    fn test_destroy_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StoreHandle::destroy(dir.path().join("missing.json")).is_ok());
    }

    #[tokio::test]
    async fn test_open_recreates_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let handle = StoreHandle::open(StoreLocation::File(path.clone()), test_model());

        assert_eq!(handle.coordinator().location(), &StoreLocation::File(path.clone()));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(StoreSnapshot::from_json(&text).is_ok());
    }

    #[tokio::test]
    async fn test_open_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("store.json");

        let handle = StoreHandle::open(StoreLocation::File(path), test_model());
        assert_eq!(handle.coordinator().location(), &StoreLocation::InMemory);
    }
}
