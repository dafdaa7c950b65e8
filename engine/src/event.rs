//! Save-completion events.
//!
//! A [`SaveEvent`] is the immutable record of one successful commit. It is
//! shared between every observer and sibling context, so it only ever holds
//! snapshots, never live objects.

use crate::{ContextId, Generation, ObjectSnapshot, Predicate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of change an object went through in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Inserted, ChangeKind::Updated, ChangeKind::Deleted];

    /// Key used when reporting this kind of change.
    pub fn key(&self) -> &'static str {
        match self {
            ChangeKind::Inserted => "inserted",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Snapshot of a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEvent {
    /// Context that committed
    pub origin: ContextId,
    /// Store generation produced by the commit
    pub generation: Generation,
    pub inserted: Vec<ObjectSnapshot>,
    pub updated: Vec<ObjectSnapshot>,
    pub deleted: Vec<ObjectSnapshot>,
}

impl SaveEvent {
    pub fn new(origin: ContextId, generation: Generation) -> Self {
        Self {
            origin,
            generation,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Objects that went through the given kind of change.
    pub fn objects(&self, kind: ChangeKind) -> &[ObjectSnapshot] {
        match kind {
            ChangeKind::Inserted => &self.inserted,
            ChangeKind::Updated => &self.updated,
            ChangeKind::Deleted => &self.deleted,
        }
    }

    /// Total number of changed objects.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the objects matching `predicate`, grouped by change kind.
    pub fn filter(&self, predicate: &Predicate) -> ContextUpdate {
        let mut update = ContextUpdate::default();

        for kind in ChangeKind::ALL {
            let matching: Vec<ObjectSnapshot> = self
                .objects(kind)
                .iter()
                .filter(|object| predicate.evaluate(*object))
                .cloned()
                .collect();

            if !matching.is_empty() {
                update.changes.insert(kind, matching);
            }
        }

        update
    }
}

/// Filtered view of a save event handed to observers.
///
/// Only kinds with at least one matching object are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub changes: BTreeMap<ChangeKind, Vec<ObjectSnapshot>>,
}

impl ContextUpdate {
    /// Objects for one kind; empty if none matched.
    pub fn get(&self, kind: ChangeKind) -> &[ObjectSnapshot] {
        self.changes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of matching objects.
    pub fn len(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
