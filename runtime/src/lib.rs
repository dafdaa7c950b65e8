//! # Strata Runtime
//!
//! Serialized transaction contexts on top of `strata-engine`.
//!
//! A [`StoreHandle`] opens a store and owns its root [`Context`]. Background
//! contexts derived from it run their work on their own worker task; every
//! commit is published on the store's [`EventBus`] so siblings can merge it
//! and [`ChangeObserver`]s can forward the part they care about.
//!
//! ```ignore
//! let store = StoreHandle::open(StoreLocation::File(path), model);
//! let background = store.new_background_context();
//! let _merging = store.root_context().merge_saves_automatically();
//!
//! Task::insert(&background, |task| task.id = "1".into()).await?;
//! background.save_changes().await?;
//! ```

pub mod adapter;
pub mod bus;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod observer;
pub mod reaper;

pub use adapter::{Managed, ManagedEntity};
pub use bus::{EventBus, EventStream};
pub use config::{Config, ConfigError};
pub use context::{AutoMerge, Context, ContextKind, ContextScope};
pub use coordinator::{StoreCoordinator, StoreHandle, StoreLocation};
pub use error::{Error, Result};
pub use observer::{ChangeDelegate, ChangeObserver, DeliveryQueue};
pub use reaper::{ReaperHandle, SoftDeleteReaper};
