//! Object graph - the per-context identity cache.
//!
//! Every context owns one [`ObjectGraph`]. It registers at most one
//! [`ManagedObject`] per row, overlays the context's pending changes on top of
//! the committed rows it reads, and turns those changes into a commit and a
//! [`SaveEvent`].
//!
//! Reads are pinned to the graph's generation. The generation moves forward
//! when the graph commits, merges an event, or is reset; until then sibling
//! commits stay invisible.

use crate::{
    error::Result, predicate::sort_order, ContextId, EntityName, Error, Evaluate, FieldMap,
    Generation, ManagedObject, ObjectId, ObjectSnapshot, ObjectState, Predicate, RowChange,
    RowStore, SaveEvent,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// How incoming events resolve fields changed both locally and remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergePolicy {
    /// The incoming value wins, per field.
    #[default]
    Overwrite,
    /// Locally changed fields keep their local value.
    KeepLocal,
}

/// Sort order for fetch results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

/// A query against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Entity to fetch
    pub entity: EntityName,
    /// Filter; `None` matches every row
    pub predicate: Option<Predicate>,
    /// Maximum number of results
    pub fetch_limit: Option<usize>,
    /// Register results as faults instead of materializing them
    pub returns_objects_as_faults: bool,
    /// Applied in order; ties keep store order
    pub sort_descriptors: Vec<SortDescriptor>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<EntityName>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            fetch_limit: None,
            returns_objects_as_faults: true,
            sort_descriptors: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = Some(limit);
        self
    }

    /// Materialize results as they are registered.
    pub fn materialized(mut self) -> Self {
        self.returns_objects_as_faults = false;
        self
    }

    pub fn sorted_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort_descriptors.push(SortDescriptor {
            key: key.into(),
            ascending,
        });
        self
    }
}

/// Borrowed view of a committed row, for evaluating predicates without cloning.
struct RowView<'a> {
    entity: &'a str,
    values: &'a FieldMap,
}

impl Evaluate for RowView<'_> {
    fn entity_name(&self) -> &str {
        self.entity
    }

    fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// Per-context registry of live objects and their pending changes.
#[derive(Debug, Clone)]
pub struct ObjectGraph {
    context: ContextId,
    generation: Generation,
    merge_policy: MergePolicy,
    objects: HashMap<ObjectId, ManagedObject>,
    /// Registration order, used by scans
    order: Vec<ObjectId>,
}

impl ObjectGraph {
    /// Create an empty graph reading at `generation`.
    pub fn new(context: ContextId, generation: Generation, merge_policy: MergePolicy) -> Self {
        Self {
            context,
            generation,
            merge_policy,
            objects: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Generation this graph reads at.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Get a registered object.
    pub fn object(&self, id: &ObjectId) -> Option<&ManagedObject> {
        self.objects.get(id)
    }

    /// Registered objects in registration order.
    pub fn registered_objects(&self) -> impl Iterator<Item = &ManagedObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn registered_count(&self) -> usize {
        self.objects.len()
    }

    /// Whether anything is waiting to be committed.
    pub fn has_changes(&self) -> bool {
        self.objects.values().any(ManagedObject::has_changes)
    }

    fn register(&mut self, object: ManagedObject) {
        let id = object.id();
        if self.objects.insert(id, object).is_none() {
            self.order.push(id);
        }
    }

    fn unregister(&mut self, id: &ObjectId) {
        if self.objects.remove(id).is_some() {
            self.order.retain(|registered| registered != id);
        }
    }

    /// Insert a new object. Nothing reaches the store until commit.
    pub fn insert(&mut self, store: &RowStore, entity: &str, values: FieldMap) -> Result<ObjectId> {
        store.model().entity(entity)?;

        let id = ObjectId::new();
        self.register(ManagedObject::inserted(id, entity.to_string(), values));
        Ok(id)
    }

    /// Get an object by identity, registering and materializing it as needed.
    pub fn existing_object(&mut self, store: &RowStore, id: ObjectId) -> Result<&ManagedObject> {
        let generation = self.generation;

        if !self.objects.contains_key(&id) {
            let (entity, values) = store
                .row_at(&id, generation)
                .ok_or(Error::ObjectNotFound(id))?;
            self.register(ManagedObject::fetched(id, entity.clone(), Some(values.clone())));
        }

        let object = self.objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))?;
        if object.is_deleted() {
            return Err(Error::ObjectDeleted(id));
        }
        if object.is_fault() {
            let (_, values) = store
                .row_at(&id, generation)
                .ok_or(Error::ObjectNotFound(id))?;
            object.fill(values.clone());
        }

        Ok(&*object)
    }

    /// Set fields on an object. Returns whether any value changed.
    pub fn update(&mut self, store: &RowStore, id: ObjectId, patch: FieldMap) -> Result<bool> {
        self.existing_object(store, id)?;
        let object = self.objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))?;
        Ok(object.apply_patch(patch))
    }

    /// Delete an object. Pending inserts are simply forgotten.
    pub fn delete(&mut self, store: &RowStore, id: ObjectId) -> Result<()> {
        match self.objects.get(&id).map(ManagedObject::state) {
            Some(ObjectState::Inserted) => {
                self.unregister(&id);
                return Ok(());
            }
            Some(ObjectState::Deleted) => return Ok(()),
            _ => {}
        }

        // Materialize so the save event can report the deleted fields.
        self.existing_object(store, id)?;
        if let Some(object) = self.objects.get_mut(&id) {
            object.mark_deleted();
        }
        Ok(())
    }

    /// Run a fetch against the store, overlaying this context's pending changes.
    ///
    /// Committed rows come first in store order, pending inserts after them.
    /// Locally deleted objects are skipped and locally modified objects are
    /// matched on their local values. Results are registered in the graph.
    pub fn fetch(&mut self, store: &RowStore, request: &FetchRequest) -> Result<Vec<ObjectSnapshot>> {
        let table = store.table(&request.entity)?;
        let matches = |object: &dyn Evaluate| {
            request
                .predicate
                .as_ref()
                .map_or(true, |predicate| predicate.evaluate(object))
        };

        let mut results = Vec::new();

        for (id, row) in table.rows_at(self.generation) {
            match self.objects.get(&id) {
                Some(object) if object.is_deleted() => continue,
                Some(object) if !object.is_fault() => {
                    if matches(object) {
                        results.push(detached(object));
                    }
                }
                _ => {
                    let view = RowView {
                        entity: &request.entity,
                        values: row,
                    };
                    if matches(&view) {
                        results.push(ObjectSnapshot::new(id, request.entity.clone(), row.clone()));
                    }
                }
            }
        }

        for object in self.registered_objects() {
            if object.state() == ObjectState::Inserted
                && object.entity() == request.entity
                && matches(object)
            {
                results.push(detached(object));
            }
        }

        if !request.sort_descriptors.is_empty() {
            results.sort_by(|a, b| compare_snapshots(a, b, request));
        }
        if let Some(limit) = request.fetch_limit {
            results.truncate(limit);
        }

        for snapshot in &results {
            match self.objects.get_mut(&snapshot.id) {
                None => {
                    let values = if request.returns_objects_as_faults {
                        None
                    } else {
                        Some(snapshot.values.clone())
                    };
                    self.register(ManagedObject::fetched(
                        snapshot.id,
                        snapshot.entity.clone(),
                        values,
                    ));
                }
                Some(object) if object.is_fault() && !request.returns_objects_as_faults => {
                    object.fill(snapshot.values.clone());
                }
                Some(_) => {}
            }
        }

        Ok(results)
    }

    /// First resident object of `entity` matching `predicate`, without a query.
    ///
    /// Only materialized, non-deleted objects are considered. When several
    /// match, the earliest registered one wins.
    pub fn materialized_object(&self, entity: &str, predicate: &Predicate) -> Option<ObjectSnapshot> {
        self.registered_objects()
            .find(|object| {
                !object.is_fault()
                    && !object.is_deleted()
                    && object.entity() == entity
                    && predicate.evaluate(*object)
            })
            .map(detached)
    }

    /// Pending changes in registration order.
    pub fn pending_changes(&self) -> Vec<RowChange> {
        self.registered_objects()
            .filter_map(|object| {
                let id = object.id();
                let entity = object.entity().to_string();
                match object.state() {
                    ObjectState::Clean => None,
                    ObjectState::Inserted => Some(RowChange::Insert {
                        id,
                        entity,
                        values: object.values().cloned().unwrap_or_default(),
                    }),
                    ObjectState::Updated => {
                        let values = object.values()?;
                        let changed = object
                            .changed_keys()
                            .iter()
                            .map(|key| {
                                let value = values.get(key).cloned().unwrap_or_default();
                                (key.clone(), value)
                            })
                            .collect();
                        Some(RowChange::Update {
                            id,
                            entity,
                            changed,
                        })
                    }
                    ObjectState::Deleted => Some(RowChange::Delete { id, entity }),
                }
            })
            .collect()
    }

    /// Commit pending changes to the store.
    ///
    /// Returns `None` when there was nothing to commit. On failure the graph
    /// keeps its pending changes untouched.
    pub fn commit(&mut self, store: &mut RowStore) -> Result<Option<SaveEvent>> {
        let changes = self.pending_changes();
        if changes.is_empty() {
            return Ok(None);
        }

        let generation = store.commit(&changes)?;
        let mut event = SaveEvent::new(self.context, generation);
        let mut removed = Vec::new();

        for object in self.objects.values_mut() {
            let state = object.state();
            if state == ObjectState::Clean {
                continue;
            }

            let mut snapshot = object.snapshot();
            if state == ObjectState::Deleted {
                removed.push(object.id());
                event.deleted.push(snapshot);
                continue;
            }

            // Report the committed row, which may carry fields other
            // contexts wrote since this one last read.
            match store.get(&object.id()) {
                Some((_, committed)) => {
                    snapshot.values = committed.clone();
                    object.reload(committed.clone());
                }
                None => object.mark_clean(),
            }

            if state == ObjectState::Inserted {
                event.inserted.push(snapshot);
            } else {
                event.updated.push(snapshot);
            }
        }

        sort_by_registration(&mut event.inserted, &self.order);
        sort_by_registration(&mut event.updated, &self.order);
        sort_by_registration(&mut event.deleted, &self.order);

        for id in removed {
            self.unregister(&id);
        }

        self.generation = generation;
        Ok(Some(event))
    }

    /// Apply another context's save event under this graph's merge policy.
    ///
    /// Registered objects pick up changed fields, objects deleted elsewhere
    /// are dropped, and the graph's generation moves up to the event's so
    /// its inserts become visible to later fetches.
    ///
    /// An event older than the graph's generation no longer describes the
    /// committed row. Its changed fields are then read from `store` at the
    /// graph's generation instead of from the event.
    pub fn merge(&mut self, store: &RowStore, event: &SaveEvent) {
        if event.origin == self.context {
            return;
        }

        let stale = event.generation < self.generation;
        for snapshot in &event.updated {
            let committed = stale
                .then(|| store.row_at(&snapshot.id, self.generation))
                .flatten()
                .map(|(_, values)| values);

            let Some(object) = self.objects.get_mut(&snapshot.id) else {
                continue;
            };
            if object.is_deleted() || object.is_fault() {
                continue;
            }

            for key in &snapshot.changed {
                let dirty = object.changed_keys().contains(key);
                if dirty && self.merge_policy == MergePolicy::KeepLocal {
                    continue;
                }
                let value = committed
                    .and_then(|values| values.get(key))
                    .or_else(|| snapshot.values.get(key))
                    .cloned()
                    .unwrap_or_default();
                object.absorb(key, value);
            }
        }

        for snapshot in &event.deleted {
            self.unregister(&snapshot.id);
        }

        self.generation = self.generation.max(event.generation);
    }

    /// Forget every registered object and read at `generation` from now on.
    pub fn reset(&mut self, generation: Generation) {
        self.objects.clear();
        self.order.clear();
        self.generation = generation;
    }
}

fn detached(object: &ManagedObject) -> ObjectSnapshot {
    ObjectSnapshot::new(
        object.id(),
        object.entity(),
        object.values().cloned().unwrap_or_default(),
    )
}

fn sort_by_registration(snapshots: &mut [ObjectSnapshot], order: &[ObjectId]) {
    let position: HashMap<ObjectId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    snapshots.sort_by_key(|s| position.get(&s.id).copied().unwrap_or(usize::MAX));
}

fn compare_snapshots(a: &ObjectSnapshot, b: &ObjectSnapshot, request: &FetchRequest) -> Ordering {
    let null = serde_json::Value::Null;
    for descriptor in &request.sort_descriptors {
        let left = a.get(&descriptor.key).unwrap_or(&null);
        let right = b.get(&descriptor.key).unwrap_or(&null);
        let ordering = sort_order(left, right);
        let ordering = if descriptor.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldDef, FieldType};
    use crate::{ChangeKind, Model};
    use serde_json::json;

    fn test_model() -> Model {
        Model::new(1)
            .with_entity(EntitySchema::new(
                "Task",
                vec![
                    FieldDef::required("id", FieldType::String),
                    FieldDef::optional("name", FieldType::String),
                    FieldDef::optional("priority", FieldType::Int),
                ],
            ))
            .with_entity(EntitySchema::new(
                "Note",
                vec![FieldDef::optional("body", FieldType::String)],
            ))
    }

    fn fields(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn graph(store: &RowStore) -> ObjectGraph {
        ObjectGraph::new(ContextId::new(), store.generation(), MergePolicy::Overwrite)
    }

    #[test]
    fn insert_is_pending_until_commit() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);

        let id = g.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();

        assert!(g.has_changes());
        assert!(store.get(&id).is_none());

        let event = g.commit(&mut store).unwrap().unwrap();
        assert!(!g.has_changes());
        assert!(store.get(&id).is_some());
        assert_eq!(event.inserted.len(), 1);
        assert_eq!(event.inserted[0].id, id);
        assert_eq!(event.generation, 1);
        assert_eq!(g.generation(), 1);
    }

    #[test]
    fn insert_unknown_entity_fails() {
        let store = RowStore::new(test_model());
        let mut g = graph(&store);
        let result = g.insert(&store, "Project", FieldMap::new());
        assert!(matches!(result, Err(Error::EntityNotFound(e)) if e == "Project"));
    }

    #[test]
    fn commit_without_changes_is_none() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        assert!(g.commit(&mut store).unwrap().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn failed_commit_keeps_pending_changes() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        g.insert(&store, "Task", fields(json!({"name": "no id"}))).unwrap();

        assert!(g.commit(&mut store).is_err());
        assert!(g.has_changes());
        assert_eq!(g.generation(), 0);
    }

    #[test]
    fn fetch_includes_pending_inserts() {
        let store = RowStore::new(test_model());
        let mut g = graph(&store);
        let id = g.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();

        let results = g
            .fetch(&store, &FetchRequest::new("Task").with_predicate(Predicate::eq("id", "1")))
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn fetch_hides_local_deletes_and_sees_local_updates() {
        let mut store = RowStore::new(test_model());
        let mut writer = graph(&store);
        let a = writer.insert(&store, "Task", fields(json!({"id": "a"}))).unwrap();
        let b = writer.insert(&store, "Task", fields(json!({"id": "b"}))).unwrap();
        writer.commit(&mut store).unwrap();

        let mut g = graph(&store);
        g.delete(&store, a).unwrap();
        g.update(&store, b, fields(json!({"name": "renamed"}))).unwrap();

        let results = g.fetch(&store, &FetchRequest::new("Task")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, b);
        assert_eq!(results[0].values["name"], json!("renamed"));

        let by_name = g
            .fetch(
                &store,
                &FetchRequest::new("Task").with_predicate(Predicate::eq("name", "renamed")),
            )
            .unwrap();
        assert_eq!(by_name.len(), 1);
    }

    #[test]
    fn fetch_registers_faults_by_default() {
        let mut store = RowStore::new(test_model());
        let mut writer = graph(&store);
        let id = writer.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();
        writer.commit(&mut store).unwrap();

        let mut g = graph(&store);
        g.fetch(&store, &FetchRequest::new("Task")).unwrap();
        assert!(g.object(&id).unwrap().is_fault());
        assert!(g.materialized_object("Task", &Predicate::True).is_none());

        g.fetch(&store, &FetchRequest::new("Task").materialized()).unwrap();
        assert!(!g.object(&id).unwrap().is_fault());
        assert!(g.materialized_object("Task", &Predicate::True).is_some());
    }

    #[test]
    fn fetch_sorts_and_limits() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        for (id, priority) in [("a", 2), ("b", 9), ("c", 5)] {
            g.insert(&store, "Task", fields(json!({"id": id, "priority": priority})))
                .unwrap();
        }
        g.commit(&mut store).unwrap();

        let results = g
            .fetch(
                &store,
                &FetchRequest::new("Task")
                    .sorted_by("priority", false)
                    .with_limit(2),
            )
            .unwrap();

        let ids: Vec<_> = results.iter().map(|s| s.values["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("c")]);
    }

    #[test]
    fn fetch_unknown_entity_is_an_error() {
        let store = RowStore::new(test_model());
        let mut g = graph(&store);
        let result = g.fetch(&store, &FetchRequest::new("Project"));
        assert!(matches!(result, Err(Error::EntityNotFound(_))));
    }

    #[test]
    fn materialized_object_skips_deleted_and_other_entities() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        let task = g.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();
        g.insert(&store, "Note", fields(json!({"body": "1"}))).unwrap();
        g.commit(&mut store).unwrap();

        let found = g.materialized_object("Task", &Predicate::True).unwrap();
        assert_eq!(found.id, task);

        g.delete(&store, task).unwrap();
        assert!(g.materialized_object("Task", &Predicate::True).is_none());
    }

    #[test]
    fn sibling_commit_invisible_until_merge() {
        let mut store = RowStore::new(test_model());
        let mut a = graph(&store);
        let mut b = graph(&store);

        let id = a.insert(&store, "Task", fields(json!({"id": "y"}))).unwrap();
        let event = a.commit(&mut store).unwrap().unwrap();

        let request = FetchRequest::new("Task").with_predicate(Predicate::eq("id", "y"));
        assert!(b.fetch(&store, &request).unwrap().is_empty());

        b.merge(&store, &event);
        let results = b.fetch(&store, &request).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn overwrite_merge_lets_incoming_field_win() {
        let mut store = RowStore::new(test_model());
        let mut setup = graph(&store);
        let id = setup
            .insert(&store, "Task", fields(json!({"id": "1", "name": "a", "priority": 1})))
            .unwrap();
        setup.commit(&mut store).unwrap();

        let mut a = graph(&store);
        let mut b = graph(&store);

        b.update(&store, id, fields(json!({"name": "local", "priority": 7})))
            .unwrap();
        a.update(&store, id, fields(json!({"name": "remote"}))).unwrap();
        let event = a.commit(&mut store).unwrap().unwrap();
        assert_eq!(event.updated.len(), 1);
        assert!(event.updated[0].changed.contains("name"));

        b.merge(&store, &event);
        let object = b.object(&id).unwrap();
        assert_eq!(object.values().unwrap()["name"], json!("remote"));
        assert_eq!(object.values().unwrap()["priority"], json!(7));
        assert!(!object.changed_keys().contains("name"));
        assert!(object.changed_keys().contains("priority"));

        b.commit(&mut store).unwrap();
        let (_, row) = store.get(&id).unwrap();
        assert_eq!(row["name"], json!("remote"));
        assert_eq!(row["priority"], json!(7));
    }

    #[test]
    fn keep_local_merge_preserves_dirty_fields() {
        let mut store = RowStore::new(test_model());
        let mut setup = graph(&store);
        let id = setup
            .insert(&store, "Task", fields(json!({"id": "1", "name": "a"})))
            .unwrap();
        setup.commit(&mut store).unwrap();

        let mut a = graph(&store);
        let mut b = ObjectGraph::new(ContextId::new(), store.generation(), MergePolicy::KeepLocal);

        b.update(&store, id, fields(json!({"name": "local"}))).unwrap();
        a.update(&store, id, fields(json!({"name": "remote"}))).unwrap();
        let event = a.commit(&mut store).unwrap().unwrap();

        b.merge(&store, &event);
        assert_eq!(b.object(&id).unwrap().values().unwrap()["name"], json!("local"));
    }

    #[test]
    fn stale_event_does_not_undo_newer_commit() {
        let mut store = RowStore::new(test_model());
        let mut setup = graph(&store);
        let id = setup
            .insert(&store, "Task", fields(json!({"id": "1", "name": "a"})))
            .unwrap();
        setup.commit(&mut store).unwrap();

        let mut a = graph(&store);
        let mut b = graph(&store);
        b.existing_object(&store, id).unwrap();

        a.update(&store, id, fields(json!({"name": "from a"}))).unwrap();
        let event = a.commit(&mut store).unwrap().unwrap();

        b.update(&store, id, fields(json!({"name": "from b"}))).unwrap();
        b.commit(&mut store).unwrap();
        assert!(event.generation < b.generation());

        b.merge(&store, &event);
        assert_eq!(b.object(&id).unwrap().values().unwrap()["name"], json!("from b"));
        assert!(!b.has_changes());
        assert!(b.commit(&mut store).unwrap().is_none());
        assert_eq!(store.get(&id).unwrap().1["name"], json!("from b"));
    }

    #[test]
    fn stale_event_refreshes_object_behind_its_generation() {
        let mut store = RowStore::new(test_model());
        let mut setup = graph(&store);
        let id = setup
            .insert(&store, "Task", fields(json!({"id": "1", "name": "a"})))
            .unwrap();
        setup.commit(&mut store).unwrap();

        let mut a = graph(&store);
        let mut c = graph(&store);
        let mut b = graph(&store);
        b.existing_object(&store, id).unwrap();

        a.update(&store, id, fields(json!({"name": "first"}))).unwrap();
        let first = a.commit(&mut store).unwrap().unwrap();

        c.update(&store, id, fields(json!({"name": "second"}))).unwrap();
        let second = c.commit(&mut store).unwrap().unwrap();

        b.merge(&store, &second);
        b.merge(&store, &first);
        assert_eq!(b.object(&id).unwrap().values().unwrap()["name"], json!("second"));
        assert!(!b.has_changes());
    }

    #[test]
    fn merge_drops_objects_deleted_elsewhere() {
        let mut store = RowStore::new(test_model());
        let mut a = graph(&store);
        let id = a.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();
        a.commit(&mut store).unwrap();

        let mut b = graph(&store);
        b.existing_object(&store, id).unwrap();
        assert_eq!(b.registered_count(), 1);

        a.delete(&store, id).unwrap();
        let event = a.commit(&mut store).unwrap().unwrap();
        assert_eq!(event.objects(ChangeKind::Deleted).len(), 1);
        assert_eq!(event.deleted[0].values["id"], json!("1"));

        b.merge(&store, &event);
        assert_eq!(b.registered_count(), 0);
    }

    #[test]
    fn merge_ignores_own_events() {
        let mut store = RowStore::new(test_model());
        let mut a = graph(&store);
        a.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();
        let mut event = a.commit(&mut store).unwrap().unwrap();
        event.generation = 99;

        a.merge(&store, &event);
        assert_eq!(a.generation(), 1);
    }

    #[test]
    fn deleting_pending_insert_forgets_it() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        let id = g.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();

        g.delete(&store, id).unwrap();
        assert!(!g.has_changes());
        assert!(g.commit(&mut store).unwrap().is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut store = RowStore::new(test_model());
        let mut g = graph(&store);
        g.insert(&store, "Task", fields(json!({"id": "1"}))).unwrap();

        g.reset(store.generation());
        assert_eq!(g.registered_count(), 0);
        assert!(!g.has_changes());
        assert!(g.commit(&mut store).unwrap().is_none());
    }
}
