//! Transaction contexts.
//!
//! A [`Context`] is a handle to one serialized worker. The worker owns the
//! context's [`ObjectGraph`] and runs submitted jobs one at a time, in
//! submission order, against a [`ContextScope`]. Handles are cheap to clone;
//! the worker stops once the last handle is dropped. A panicking job is
//! logged and discarded and the worker moves on to the next one.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use strata_engine::{
    ContextId, FetchRequest, FieldMap, Generation, MergePolicy, Model, ObjectGraph, ObjectId,
    ObjectSnapshot, Predicate, SaveEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::coordinator::StoreCoordinator;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce(&mut ContextScope) + Send>;

/// Role of a context within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// The store's long-lived main context
    Root,
    /// A derived context for background work
    Background,
}

struct ContextInner {
    id: ContextId,
    kind: ContextKind,
    merge_policy: MergePolicy,
    coordinator: Arc<StoreCoordinator>,
    jobs: mpsc::UnboundedSender<Job>,
}

/// Handle to a transaction context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("merge_policy", &self.inner.merge_policy)
            .finish()
    }
}

impl Context {
    /// Start a context worker reading at the store's latest generation.
    pub(crate) fn spawn(
        coordinator: Arc<StoreCoordinator>,
        kind: ContextKind,
        merge_policy: MergePolicy,
    ) -> Self {
        let id = ContextId::new();
        let generation = coordinator.register_reader(id);
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        let mut scope = ContextScope {
            graph: ObjectGraph::new(id, generation, merge_policy),
            coordinator: Arc::clone(&coordinator),
        };

        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                if catch_unwind(AssertUnwindSafe(|| job(&mut scope))).is_err() {
                    tracing::error!(context = %id, "Context job panicked");
                }
            }

            tracing::debug!(context = %id, "Context worker stopped");
        });

        tracing::debug!(context = %id, kind = ?kind, generation, "Context created");

        Self {
            inner: Arc::new(ContextInner {
                id,
                kind,
                merge_policy,
                coordinator,
                jobs,
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.inner.merge_policy
    }

    pub fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.inner.coordinator
    }

    pub fn model(&self) -> &Model {
        self.inner.coordinator.model()
    }

    /// Queue a job on this context and return immediately.
    pub fn perform<F>(&self, job: F)
    where
        F: FnOnce(&mut ContextScope) + Send + 'static,
    {
        if self.inner.jobs.send(Box::new(job)).is_err() {
            tracing::warn!(context = %self.id(), "Dropped job for a closed context");
        }
    }

    /// Queue a job on this context and wait for its result.
    ///
    /// Fails with [`Error::JobAborted`] if the job panics.
    pub async fn perform_and_wait<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut ContextScope) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.inner
            .jobs
            .send(Box::new(move |scope: &mut ContextScope| {
                let _ = tx.send(job(scope));
            }))
            .map_err(|_| Error::ContextClosed(self.id()))?;

        rx.await.map_err(|_| Error::JobAborted(self.id()))
    }

    /// Commit pending changes in the background.
    ///
    /// `on_complete` runs on this context's worker. With nothing to commit it
    /// receives `Ok(())` straight away; a failed commit is reported once and
    /// the pending changes stay in place.
    pub fn save<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.perform(move |scope| on_complete(scope.save().map(|_| ())));
    }

    /// Commit pending changes and wait for the resulting event.
    pub async fn save_changes(&self) -> Result<Option<Arc<SaveEvent>>> {
        self.perform_and_wait(|scope| scope.save()).await?
    }

    /// Merge another context's save event in the background.
    pub fn merge_changes<F>(&self, event: Arc<SaveEvent>, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.perform(move |scope| {
            scope.merge(&event);
            on_complete();
        });
    }

    /// Merge another context's save event and wait until it is applied.
    pub async fn merge_changes_and_wait(&self, event: Arc<SaveEvent>) -> Result<()> {
        self.perform_and_wait(move |scope| scope.merge(&event)).await
    }

    /// Run a fetch in the background and hand the results to `on_complete`.
    pub fn execute<F>(&self, request: FetchRequest, on_complete: F)
    where
        F: FnOnce(Result<Vec<ObjectSnapshot>>) + Send + 'static,
    {
        self.perform(move |scope| on_complete(scope.fetch(&request)));
    }

    /// A new background context on the same store with the same merge policy.
    pub fn create_derived_context(&self) -> Context {
        self.create_derived_context_with(self.inner.merge_policy)
    }

    /// A new background context on the same store with its own merge policy.
    pub fn create_derived_context_with(&self, merge_policy: MergePolicy) -> Context {
        Context::spawn(
            Arc::clone(&self.inner.coordinator),
            ContextKind::Background,
            merge_policy,
        )
    }

    /// Whether the context holds uncommitted changes.
    pub async fn has_changes(&self) -> Result<bool> {
        self.perform_and_wait(|scope| scope.has_changes()).await
    }

    /// Forget every registered object and pending change.
    pub async fn reset(&self) -> Result<()> {
        self.perform_and_wait(|scope| scope.reset()).await
    }

    /// Merge every save event from other contexts as it is published.
    ///
    /// Merging stops when the returned handle or the context is dropped.
    pub fn merge_saves_automatically(&self) -> AutoMerge {
        let mut stream = self.inner.coordinator.bus().subscribe();
        let context: Weak<ContextInner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let Some(inner) = context.upgrade() else {
                    break;
                };
                if event.origin != inner.id {
                    Context { inner }.merge_changes(event, || {});
                }
            }
        });

        AutoMerge { task }
    }
}

/// Keeps a context merging foreign save events. Dropping it stops merging.
#[derive(Debug)]
pub struct AutoMerge {
    task: JoinHandle<()>,
}

impl Drop for AutoMerge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A context's state, reachable only from its worker.
pub struct ContextScope {
    graph: ObjectGraph,
    coordinator: Arc<StoreCoordinator>,
}

impl ContextScope {
    pub fn context_id(&self) -> ContextId {
        self.graph.context_id()
    }

    /// Generation this context reads at.
    pub fn generation(&self) -> Generation {
        self.graph.generation()
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn has_changes(&self) -> bool {
        self.graph.has_changes()
    }

    pub fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<ObjectSnapshot>> {
        let store = self.coordinator.read();
        Ok(self.graph.fetch(&store, request)?)
    }

    pub fn insert(&mut self, entity: &str, values: FieldMap) -> Result<ObjectId> {
        let store = self.coordinator.read();
        Ok(self.graph.insert(&store, entity, values)?)
    }

    /// Current fields of an object, materializing it if needed.
    pub fn object(&mut self, id: ObjectId) -> Result<ObjectSnapshot> {
        let store = self.coordinator.read();
        let object = self.graph.existing_object(&store, id)?;
        Ok(ObjectSnapshot::new(
            object.id(),
            object.entity(),
            object.values().cloned().unwrap_or_default(),
        ))
    }

    pub fn update(&mut self, id: ObjectId, patch: FieldMap) -> Result<bool> {
        let store = self.coordinator.read();
        Ok(self.graph.update(&store, id, patch)?)
    }

    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        let store = self.coordinator.read();
        Ok(self.graph.delete(&store, id)?)
    }

    pub fn materialized_object(&self, entity: &str, predicate: &Predicate) -> Option<ObjectSnapshot> {
        self.graph.materialized_object(entity, predicate)
    }

    /// Delete every object of `entity` matching `predicate`.
    ///
    /// With `should_sync` the deletions are committed right away. A failed
    /// commit is logged, not returned, and the deletions stay applied in
    /// this context. Without `should_sync` committing is up to the caller.
    /// Returns the number of deleted objects.
    pub fn delete_all(
        &mut self,
        entity: &str,
        predicate: Option<Predicate>,
        should_sync: bool,
    ) -> Result<usize> {
        let count = self.delete_matching(entity, predicate)?;

        if should_sync {
            if let Err(e) = self.save() {
                tracing::error!(
                    context = %self.context_id(),
                    entity = %entity,
                    "Failed to commit deletions: {}",
                    e
                );
            }
        }

        Ok(count)
    }

    /// Delete every object of `entity` matching `predicate` without
    /// committing. Returns the number of deleted objects.
    pub fn delete_matching(&mut self, entity: &str, predicate: Option<Predicate>) -> Result<usize> {
        let mut request = FetchRequest::new(entity);
        request.predicate = predicate;

        let matches = self.fetch(&request)?;
        for object in &matches {
            self.delete(object.id)?;
        }

        Ok(matches.len())
    }

    /// Commit pending changes. Returns the published event, if any.
    pub fn save(&mut self) -> Result<Option<Arc<SaveEvent>>> {
        if !self.graph.has_changes() {
            return Ok(None);
        }

        match self.coordinator.commit(&mut self.graph) {
            Ok(event) => Ok(event),
            Err(e) => {
                tracing::warn!(context = %self.context_id(), "Commit failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Apply another context's save event. Own events are ignored.
    pub fn merge(&mut self, event: &SaveEvent) {
        if event.origin == self.context_id() {
            return;
        }

        {
            let store = self.coordinator.read();
            self.graph.merge(&store, event);
        }
        self.coordinator
            .advance_reader(self.context_id(), self.graph.generation());

        tracing::debug!(
            context = %self.context_id(),
            origin = %event.origin,
            generation = self.graph.generation(),
            "Merged save event"
        );
    }

    /// Forget everything and read at the latest generation.
    pub fn reset(&mut self) {
        let generation = self.coordinator.generation();
        self.graph.reset(generation);
        self.coordinator.advance_reader(self.context_id(), generation);
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.coordinator.release_reader(&self.graph.context_id());
    }
}
