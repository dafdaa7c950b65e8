//! Typed entity operations.
//!
//! [`ManagedEntity`] is implemented for every [`Entity`], so a persisted type
//! gets fetch, insert and find-or-create operations for free:
//!
//! ```ignore
//! let task = Task::find_or_create(&context, Predicate::eq("id", "1"), |task| {
//!     task.name = "a".into();
//! })
//! .await?;
//! ```
//!
//! Every operation runs as one job on the context's worker, so a lookup and
//! the change that follows it cannot interleave with other work queued on the
//! same context.

use std::future::Future;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde_json::Value;
use strata_engine::{
    Entity, Error as EngineError, FetchRequest, FieldMap, ObjectId, ObjectSnapshot, Predicate,
    Timestamp,
};

use crate::context::{Context, ContextScope};
use crate::error::Result;

/// A typed value bound to an object in one context.
#[derive(Debug, Clone, PartialEq)]
pub struct Managed<T> {
    /// Identity of the underlying object
    pub object_id: ObjectId,
    pub value: T,
}

impl<T: Entity> Managed<T> {
    fn from_snapshot(snapshot: &ObjectSnapshot) -> Result<Self> {
        Ok(Self {
            object_id: snapshot.id,
            value: T::from_fields(&snapshot.values)?,
        })
    }
}

impl<T> Deref for Managed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Epoch milliseconds for a wall-clock time.
pub fn timestamp_millis(time: DateTime<Utc>) -> Timestamp {
    time.timestamp_millis().max(0) as Timestamp
}

/// Operations available on every persisted type.
pub trait ManagedEntity: Entity {
    /// Fetch objects of this type. `configure` adjusts the request.
    fn fetch<F>(context: &Context, configure: F) -> impl Future<Output = Result<Vec<Managed<Self>>>> + Send
    where
        F: FnOnce(&mut FetchRequest) + Send;

    /// Insert a new object. Nothing is stored until the context is saved.
    fn insert<F>(context: &Context, configure: F) -> impl Future<Output = Result<Managed<Self>>> + Send
    where
        F: FnOnce(&mut Self) + Send + 'static;

    /// Configure the first object matching `predicate`, or a new one.
    ///
    /// `configure` runs on whichever object is returned, so it should be
    /// idempotent with respect to fields the object may already have.
    fn find_or_create<F>(
        context: &Context,
        predicate: Predicate,
        configure: F,
    ) -> impl Future<Output = Result<Managed<Self>>> + Send
    where
        F: FnOnce(&mut Self) + Send + 'static;

    /// The resident object matching `predicate`, or the first fetched match.
    fn find_or_fetch(
        context: &Context,
        predicate: Predicate,
    ) -> impl Future<Output = Result<Option<Managed<Self>>>> + Send;

    /// The resident object matching `predicate`, without querying the store.
    fn materialized_object(
        context: &Context,
        predicate: Predicate,
    ) -> impl Future<Output = Result<Option<Managed<Self>>>> + Send;

    /// Update the object identified by `values`, or insert a new one.
    ///
    /// Returns `None` when `values` cannot identify or build an object.
    fn insert_or_update(
        context: &Context,
        values: FieldMap,
    ) -> impl Future<Output = Result<Option<Managed<Self>>>> + Send;

    /// Change an existing object.
    fn update<F>(context: &Context, id: ObjectId, configure: F) -> impl Future<Output = Result<Managed<Self>>> + Send
    where
        F: FnOnce(&mut Self) + Send + 'static;

    /// Soft-delete an object by stamping its local deletion field with now.
    fn mark_for_local_deletion(context: &Context, id: ObjectId) -> impl Future<Output = Result<()>> + Send;

    /// Soft-delete an object as of `at`.
    fn mark_for_local_deletion_at(
        context: &Context,
        id: ObjectId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete every object matching `predicate`.
    ///
    /// With `should_sync` the deletions are committed right away and a
    /// failed commit is only logged. Without it they stay pending in the
    /// context; check [`Context::has_changes`] to see them.
    fn delete_all(
        context: &Context,
        predicate: Option<Predicate>,
        should_sync: bool,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Remove objects soft-deleted more than the retention window ago.
    fn batch_delete_marked_for_local_deletion(context: &Context) -> impl Future<Output = Result<usize>> + Send;

    /// Remove objects soft-deleted more than the retention window before `now`.
    fn batch_delete_marked_for_local_deletion_at(
        context: &Context,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// Predicate matching rows soft-deleted before `cutoff`.
pub fn marked_before(key: &str, cutoff: Timestamp) -> Predicate {
    Predicate::lt(key, cutoff)
}

fn lookup_request<T: Entity>(predicate: Predicate) -> FetchRequest {
    FetchRequest::new(T::ENTITY_NAME)
        .with_predicate(predicate)
        .with_limit(1)
        .materialized()
}

fn find_resident_or_fetch<T: Entity>(
    scope: &mut ContextScope,
    predicate: Predicate,
) -> Result<Option<ObjectSnapshot>> {
    if let Some(snapshot) = scope.materialized_object(T::ENTITY_NAME, &predicate) {
        return Ok(Some(snapshot));
    }
    Ok(scope.fetch(&lookup_request::<T>(predicate))?.into_iter().next())
}

fn insert_value<T: Entity>(scope: &mut ContextScope, value: T) -> Result<Managed<T>> {
    let object_id = scope.insert(T::ENTITY_NAME, value.dictionary_value()?)?;
    Ok(Managed { object_id, value })
}

fn typed_object<T: Entity>(scope: &mut ContextScope, id: ObjectId) -> Result<ObjectSnapshot> {
    let snapshot = scope.object(id)?;
    if snapshot.entity != T::ENTITY_NAME {
        return Err(EngineError::EntityMismatch {
            id,
            expected: T::entity_name(),
            actual: snapshot.entity,
        }
        .into());
    }
    Ok(snapshot)
}

impl<T: Entity> ManagedEntity for T {
    async fn fetch<F>(context: &Context, configure: F) -> Result<Vec<Managed<Self>>>
    where
        F: FnOnce(&mut FetchRequest) + Send,
    {
        let mut request = FetchRequest::new(Self::ENTITY_NAME);
        configure(&mut request);

        context
            .perform_and_wait(move |scope| -> Result<Vec<Managed<Self>>> {
                scope
                    .fetch(&request)?
                    .iter()
                    .map(Managed::from_snapshot)
                    .collect()
            })
            .await?
    }

    async fn insert<F>(context: &Context, configure: F) -> Result<Managed<Self>>
    where
        F: FnOnce(&mut Self) + Send + 'static,
    {
        context
            .perform_and_wait(move |scope| -> Result<Managed<Self>> {
                let mut value = Self::default();
                configure(&mut value);
                insert_value(scope, value)
            })
            .await?
    }

    async fn find_or_create<F>(context: &Context, predicate: Predicate, configure: F) -> Result<Managed<Self>>
    where
        F: FnOnce(&mut Self) + Send + 'static,
    {
        context
            .perform_and_wait(move |scope| -> Result<Managed<Self>> {
                let existing = scope
                    .fetch(&lookup_request::<Self>(predicate))?
                    .into_iter()
                    .next();

                match existing {
                    Some(snapshot) => {
                        let mut managed = Managed::<Self>::from_snapshot(&snapshot)?;
                        configure(&mut managed.value);
                        scope.update(managed.object_id, managed.value.dictionary_value()?)?;
                        Ok(managed)
                    }
                    None => {
                        let mut value = Self::default();
                        configure(&mut value);
                        insert_value(scope, value)
                    }
                }
            })
            .await?
    }

    async fn find_or_fetch(context: &Context, predicate: Predicate) -> Result<Option<Managed<Self>>> {
        context
            .perform_and_wait(move |scope| -> Result<Option<Managed<Self>>> {
                find_resident_or_fetch::<Self>(scope, predicate)?
                    .as_ref()
                    .map(Managed::from_snapshot)
                    .transpose()
            })
            .await?
    }

    async fn materialized_object(context: &Context, predicate: Predicate) -> Result<Option<Managed<Self>>> {
        context
            .perform_and_wait(move |scope| -> Result<Option<Managed<Self>>> {
                scope
                    .materialized_object(Self::ENTITY_NAME, &predicate)
                    .as_ref()
                    .map(Managed::from_snapshot)
                    .transpose()
            })
            .await?
    }

    async fn insert_or_update(context: &Context, values: FieldMap) -> Result<Option<Managed<Self>>> {
        let Some(predicate) = Self::identity_predicate(&values) else {
            return Ok(None);
        };

        context
            .perform_and_wait(move |scope| -> Result<Option<Managed<Self>>> {
                let Some(snapshot) = find_resident_or_fetch::<Self>(scope, predicate)? else {
                    let Ok(value) = Self::from_fields(&values) else {
                        return Ok(None);
                    };
                    return insert_value(scope, value).map(Some);
                };

                let mut merged = snapshot.values;
                merged.extend(values.clone());
                let Ok(value) = Self::from_fields(&merged) else {
                    return Ok(None);
                };
                scope.update(snapshot.id, values)?;
                Ok(Some(Managed {
                    object_id: snapshot.id,
                    value,
                }))
            })
            .await?
    }

    async fn update<F>(context: &Context, id: ObjectId, configure: F) -> Result<Managed<Self>>
    where
        F: FnOnce(&mut Self) + Send + 'static,
    {
        context
            .perform_and_wait(move |scope| -> Result<Managed<Self>> {
                let snapshot = typed_object::<Self>(scope, id)?;
                let mut managed = Managed::<Self>::from_snapshot(&snapshot)?;
                configure(&mut managed.value);
                scope.update(id, managed.value.dictionary_value()?)?;
                Ok(managed)
            })
            .await?
    }

    async fn mark_for_local_deletion(context: &Context, id: ObjectId) -> Result<()> {
        Self::mark_for_local_deletion_at(context, id, Utc::now()).await
    }

    async fn mark_for_local_deletion_at(context: &Context, id: ObjectId, at: DateTime<Utc>) -> Result<()> {
        let mut patch = FieldMap::new();
        patch.insert(
            Self::marked_for_local_deletion_key().to_string(),
            Value::from(timestamp_millis(at)),
        );

        context
            .perform_and_wait(move |scope| -> Result<()> {
                typed_object::<Self>(scope, id)?;
                scope.update(id, patch)?;
                Ok(())
            })
            .await?
    }

    async fn delete_all(context: &Context, predicate: Option<Predicate>, should_sync: bool) -> Result<usize> {
        context
            .perform_and_wait(move |scope| scope.delete_all(Self::ENTITY_NAME, predicate, should_sync))
            .await?
    }

    async fn batch_delete_marked_for_local_deletion(context: &Context) -> Result<usize> {
        Self::batch_delete_marked_for_local_deletion_at(context, Utc::now()).await
    }

    async fn batch_delete_marked_for_local_deletion_at(context: &Context, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::seconds(strata_engine::DELETION_RETENTION_SECS as i64);
        let cutoff = timestamp_millis(now - retention);
        let predicate = marked_before(Self::marked_for_local_deletion_key(), cutoff);

        Self::delete_all(context, Some(predicate), true).await
    }
}
