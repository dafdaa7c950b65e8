//! Change observers.
//!
//! A [`ChangeObserver`] watches the event bus on behalf of one context and
//! forwards the predicate-filtered part of every foreign save event to its
//! delegate. Deliveries run on the store's single [`DeliveryQueue`], never on
//! a context worker.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use strata_engine::{ContextId, ContextUpdate, ObservationFilter, Predicate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::coordinator::StoreCoordinator;
use crate::error::Result;

/// Receives filtered changes from a [`ChangeObserver`].
pub trait ChangeDelegate: Send + Sync + 'static {
    fn context_did_change(&self, update: ContextUpdate);
}

type Delivery = Box<dyn FnOnce() + Send>;

/// A single task running deliveries one at a time, in enqueue order.
///
/// A panicking delivery is logged and the queue keeps running.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryQueue {
    /// Start the delivery task. It stops once every queue handle is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();

        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                if catch_unwind(AssertUnwindSafe(delivery)).is_err() {
                    tracing::error!("Change delegate panicked during delivery");
                }
            }
            tracing::debug!("Delivery queue stopped");
        });

        Self { sender }
    }

    /// Queue a delivery. Returns false if the queue has stopped.
    pub fn enqueue<F>(&self, delivery: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(delivery)).is_ok()
    }
}

#[derive(Default)]
struct ObserverState {
    filter: ObservationFilter,
    delegate: Option<Weak<dyn ChangeDelegate>>,
}

/// Forwards matching changes from other contexts to a delegate.
///
/// Nothing is delivered until at least one entity is observed and a delegate
/// is set. The delegate is held weakly; deliveries for a dropped delegate are
/// discarded. Dropping the observer stops filtering new events.
pub struct ChangeObserver {
    context: ContextId,
    coordinator: Arc<StoreCoordinator>,
    state: Arc<RwLock<ObserverState>>,
    task: JoinHandle<()>,
}

impl fmt::Debug for ChangeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeObserver")
            .field("context", &self.context)
            .field("predicate", &self.predicate())
            .finish()
    }
}

impl ChangeObserver {
    /// Start observing save events on behalf of `context`.
    pub fn new(context: &Context) -> Self {
        let coordinator = Arc::clone(context.coordinator());
        let own_context = context.id();
        let state = Arc::new(RwLock::new(ObserverState::default()));

        let mut stream = coordinator.bus().subscribe();
        let delivery = coordinator.delivery().clone();
        let task_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let (update, delegate) = {
                    let state = task_state.read().unwrap_or_else(PoisonError::into_inner);
                    (
                        state.filter.evaluate(&event, own_context),
                        state.delegate.clone(),
                    )
                };

                let Some(update) = update else {
                    continue;
                };
                let Some(delegate) = delegate else {
                    tracing::debug!(context = %own_context, "No delegate set, dropping update");
                    continue;
                };

                let matched = update.len();
                let queued = delivery.enqueue(move || match delegate.upgrade() {
                    Some(delegate) => delegate.context_did_change(update),
                    None => tracing::debug!("Delegate released before delivery"),
                });

                if queued {
                    tracing::debug!(
                        context = %own_context,
                        origin = %event.origin,
                        matched,
                        "Queued change delivery"
                    );
                } else {
                    tracing::warn!(context = %own_context, "Delivery queue stopped, dropping update");
                }
            }
        });

        Self {
            context: own_context,
            coordinator,
            state,
            task,
        }
    }

    /// Start observing with a single registration.
    pub fn with_entity(context: &Context, name: &str, predicate: Predicate) -> Result<Self> {
        let observer = Self::new(context);
        observer.observe_entity(name, predicate)?;
        Ok(observer)
    }

    /// Context whose own saves are ignored.
    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Add a registration for `name` filtered by `predicate`.
    ///
    /// Fails if the model has no entity called `name`.
    pub fn observe_entity(&self, name: &str, predicate: Predicate) -> Result<()> {
        let entity = self.coordinator.model().entity(name)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.filter.observe(entity.name.clone(), predicate);
        Ok(())
    }

    /// Set the delegate. Only a weak reference is kept.
    pub fn set_delegate<D: ChangeDelegate>(&self, delegate: &Arc<D>) {
        let weak = Arc::downgrade(delegate);
        let weak: Weak<dyn ChangeDelegate> = weak;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.delegate = Some(weak);
    }

    pub fn clear_delegate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.delegate = None;
    }

    /// The accumulated predicate, if any entity is observed.
    pub fn predicate(&self) -> Option<Predicate> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.filter.predicate().cloned()
    }
}

impl Drop for ChangeObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
