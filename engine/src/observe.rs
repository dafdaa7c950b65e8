//! Accumulated observation predicates.

use crate::{ContextId, ContextUpdate, EntityName, Predicate, SaveEvent};

/// The predicate an observer accumulates over its registrations.
///
/// Each registration contributes `entity(name) AND predicate`; registrations
/// are OR-ed together, so their order never changes which objects match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    predicate: Option<Predicate>,
}

impl ObservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration for `entity` filtered by `predicate`.
    pub fn observe(&mut self, entity: impl Into<EntityName>, predicate: Predicate) {
        let registration = Predicate::entity(entity).and(predicate);

        self.predicate = Some(match self.predicate.take() {
            None => registration,
            Some(existing) => existing.or(registration),
        });
    }

    /// The accumulated predicate, if anything has been registered.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.predicate.is_none()
    }

    /// Filter an event on behalf of an observer living in `own_context`.
    ///
    /// Returns `None` for the observer's own saves, when nothing has been
    /// registered yet, or when no changed object matches.
    pub fn evaluate(&self, event: &SaveEvent, own_context: ContextId) -> Option<ContextUpdate> {
        if event.origin == own_context {
            return None;
        }

        let predicate = self.predicate.as_ref()?;
        let update = event.filter(predicate);

        if update.is_empty() {
            None
        } else {
            Some(update)
        }
    }
}
