//! Row store - the committed state shared by every context.
//!
//! Each successful commit produces a new [`Generation`]. Rows keep a short
//! version chain so a context reading at generation `g` sees exactly the
//! committed state as of `g`, no matter what siblings committed since.
//! Chains are compacted once no live reader needs the older versions.

use crate::{
    error::Result, snapshot::SnapshotRow, EntityName, Error, FieldMap, Generation, Model,
    ObjectId, StoreSnapshot,
};
use std::collections::{BTreeMap, HashMap};

/// A single change applied by a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// Insert a new row with the given fields.
    Insert {
        id: ObjectId,
        entity: EntityName,
        values: FieldMap,
    },
    /// Overwrite the given fields of an existing row.
    Update {
        id: ObjectId,
        entity: EntityName,
        changed: FieldMap,
    },
    /// Remove a row. Removing a row that is already gone is a no-op.
    Delete { id: ObjectId, entity: EntityName },
}

impl RowChange {
    pub fn id(&self) -> ObjectId {
        match self {
            RowChange::Insert { id, .. }
            | RowChange::Update { id, .. }
            | RowChange::Delete { id, .. } => *id,
        }
    }

    pub fn entity(&self) -> &EntityName {
        match self {
            RowChange::Insert { entity, .. }
            | RowChange::Update { entity, .. }
            | RowChange::Delete { entity, .. } => entity,
        }
    }
}

#[derive(Debug, Clone)]
struct RowVersion {
    generation: Generation,
    /// `None` marks the row as deleted from this generation on.
    values: Option<FieldMap>,
}

#[derive(Debug, Clone)]
struct RowHistory {
    id: ObjectId,
    versions: Vec<RowVersion>,
}

impl RowHistory {
    fn at(&self, generation: Generation) -> Option<&FieldMap> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.generation <= generation)
            .and_then(|v| v.values.as_ref())
    }

    fn latest(&self) -> Option<&FieldMap> {
        self.versions.last().and_then(|v| v.values.as_ref())
    }
}

/// Rows of one entity, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: BTreeMap<u64, RowHistory>,
    by_id: HashMap<ObjectId, u64>,
}

impl Table {
    fn history(&self, id: &ObjectId) -> Option<&RowHistory> {
        self.by_id.get(id).and_then(|seq| self.rows.get(seq))
    }

    /// Rows visible at a generation, in insertion order.
    pub fn rows_at(&self, generation: Generation) -> impl Iterator<Item = (ObjectId, &FieldMap)> {
        self.rows
            .values()
            .filter_map(move |h| h.at(generation).map(|values| (h.id, values)))
    }

    /// Count of rows in the latest generation.
    pub fn len(&self) -> usize {
        self.rows.values().filter(|h| h.latest().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The committed state of every entity.
#[derive(Debug, Clone)]
pub struct RowStore {
    /// Model for validation
    model: Model,
    /// Generation of the latest commit
    generation: Generation,
    /// Next insertion sequence number
    next_seq: u64,
    /// Tables by entity name
    tables: HashMap<EntityName, Table>,
    /// Entity of every known row
    index: HashMap<ObjectId, EntityName>,
}

impl RowStore {
    /// Create an empty store for the given model.
    pub fn new(model: Model) -> Self {
        let tables = model
            .entities
            .keys()
            .map(|name| (name.clone(), Table::default()))
            .collect();

        Self {
            model,
            generation: 0,
            next_seq: 0,
            tables,
            index: HashMap::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Generation of the latest commit.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Get a table by entity name.
    pub fn table(&self, entity: &str) -> Result<&Table> {
        self.tables
            .get(entity)
            .ok_or_else(|| Error::EntityNotFound(entity.to_string()))
    }

    /// Look up a row as of a generation.
    pub fn row_at(&self, id: &ObjectId, generation: Generation) -> Option<(&EntityName, &FieldMap)> {
        let entity = self.index.get(id)?;
        let values = self.tables.get(entity)?.history(id)?.at(generation)?;
        Some((entity, values))
    }

    /// Look up a row in the latest generation.
    pub fn get(&self, id: &ObjectId) -> Option<(&EntityName, &FieldMap)> {
        self.row_at(id, self.generation)
    }

    /// Count of live rows across all entities.
    pub fn len(&self) -> usize {
        self.tables.values().map(Table::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a set of changes atomically.
    ///
    /// Every change is validated before any row is touched. On success the
    /// store moves to a new generation, which is returned. An empty change
    /// set leaves the generation untouched.
    pub fn commit(&mut self, changes: &[RowChange]) -> Result<Generation> {
        if changes.is_empty() {
            return Ok(self.generation);
        }

        let staged = self.stage(changes)?;

        self.generation += 1;
        let generation = self.generation;

        for (id, entity, values) in staged {
            let table = self
                .tables
                .get_mut(&entity)
                .ok_or_else(|| Error::EntityNotFound(entity.clone()))?;

            let seq = match table.by_id.get(&id) {
                Some(seq) => *seq,
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    table.by_id.insert(id, seq);
                    table.rows.insert(
                        seq,
                        RowHistory {
                            id,
                            versions: Vec::new(),
                        },
                    );
                    seq
                }
            };

            if let Some(history) = table.rows.get_mut(&seq) {
                history.versions.push(RowVersion { generation, values });
            }
            self.index.insert(id, entity);
        }

        Ok(generation)
    }

    /// Resolve changes against the latest rows and validate the results.
    fn stage(&self, changes: &[RowChange]) -> Result<Vec<(ObjectId, EntityName, Option<FieldMap>)>> {
        let mut staged: Vec<(ObjectId, EntityName, Option<FieldMap>)> = Vec::new();
        let mut positions: HashMap<ObjectId, usize> = HashMap::new();

        for change in changes {
            let id = change.id();
            let entity = change.entity();
            self.model.entity(entity)?;

            let current = match positions.get(&id) {
                Some(pos) => staged[*pos].2.clone(),
                None => self.get(&id).map(|(_, values)| values.clone()),
            };

            let next = match change {
                RowChange::Insert { values, .. } => {
                    if current.is_some() {
                        return Err(Error::ObjectAlreadyExists(id));
                    }
                    Some(values.clone())
                }
                RowChange::Update { changed, .. } => {
                    let mut values = current.ok_or(Error::ObjectNotFound(id))?;
                    for (key, value) in changed {
                        values.insert(key.clone(), value.clone());
                    }
                    Some(values)
                }
                RowChange::Delete { .. } => {
                    if current.is_none() && !positions.contains_key(&id) {
                        continue;
                    }
                    None
                }
            };

            match positions.get(&id) {
                Some(pos) => staged[*pos].2 = next,
                None => {
                    positions.insert(id, staged.len());
                    staged.push((id, entity.clone(), next));
                }
            }
        }

        for (_, entity, values) in &staged {
            if let Some(values) = values {
                self.model.entity(entity)?.validate_fields(values)?;
            }
        }

        Ok(staged)
    }

    /// Drop row versions no reader at or after `oldest_live` can observe.
    pub fn compact(&mut self, oldest_live: Generation) {
        for table in self.tables.values_mut() {
            let mut removed = Vec::new();

            for (seq, history) in table.rows.iter_mut() {
                if let Some(keep_from) = history
                    .versions
                    .iter()
                    .rposition(|v| v.generation <= oldest_live)
                {
                    history.versions.drain(..keep_from);
                }

                let gone = history.versions.len() == 1
                    && history.versions[0].values.is_none()
                    && history.versions[0].generation <= oldest_live;
                if gone {
                    removed.push((*seq, history.id));
                }
            }

            for (seq, id) in removed {
                table.rows.remove(&seq);
                table.by_id.remove(&id);
                self.index.remove(&id);
            }
        }
    }

    /// Export the latest generation as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.model.version, self.generation);

        for (name, table) in &self.tables {
            let rows: Vec<SnapshotRow> = table
                .rows_at(self.generation)
                .map(|(id, values)| SnapshotRow {
                    id,
                    values: values.clone(),
                })
                .collect();
            snapshot.entities.insert(name.clone(), rows);
        }

        snapshot
    }

    /// Build a store from a snapshot.
    ///
    /// The snapshot must have been taken with the same model version.
    pub fn from_snapshot(model: Model, snapshot: StoreSnapshot) -> Result<Self> {
        snapshot.validate(&model)?;

        let mut store = Self::new(model);
        store.generation = snapshot.generation;

        for (entity, rows) in snapshot.entities {
            let table = store
                .tables
                .get_mut(&entity)
                .ok_or_else(|| Error::EntityNotFound(entity.clone()))?;

            for row in rows {
                let seq = store.next_seq;
                store.next_seq += 1;
                table.by_id.insert(row.id, seq);
                table.rows.insert(
                    seq,
                    RowHistory {
                        id: row.id,
                        versions: vec![RowVersion {
                            generation: snapshot.generation,
                            values: Some(row.values),
                        }],
                    },
                );
                store.index.insert(row.id, entity.clone());
            }
        }

        Ok(store)
    }
}
