//! Periodic removal of soft-deleted rows.
//!
//! Rows whose local deletion timestamp is older than the retention window are
//! deleted for real and the deletions committed. Only entities whose schema
//! declares the deletion field are swept.
//!
//! The reaper works through its own background context and resets it before
//! every entity, so each sweep reads the latest committed rows.

use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_engine::{EntityName, DELETION_RETENTION_SECS};
use tokio::task::JoinHandle;

use crate::adapter::{marked_before, timestamp_millis};
use crate::context::Context;
use crate::error::Result;

/// Sweeps soft-deleted rows through a context derived from the one given.
#[derive(Debug, Clone)]
pub struct SoftDeleteReaper {
    context: Context,
    retention: Duration,
}

impl SoftDeleteReaper {
    pub fn new(parent: &Context) -> Self {
        Self::with_retention(parent, Duration::from_secs(DELETION_RETENTION_SECS))
    }

    pub fn with_retention(parent: &Context, retention: Duration) -> Self {
        Self {
            context: parent.create_derived_context(),
            retention,
        }
    }

    /// The reaper's own background context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Remove rows soft-deleted more than the retention window ago.
    pub async fn sweep(&self) -> Result<usize> {
        self.sweep_at(Utc::now()).await
    }

    /// Remove rows soft-deleted more than the retention window before `now`.
    ///
    /// Returns the number of removed rows across all entities. An entity
    /// whose deletions fail to commit is logged and counts as zero.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .map(timestamp_millis)
            .unwrap_or(0);

        let targets: Vec<(EntityName, String)> = self
            .context
            .model()
            .entity_names()
            .into_iter()
            .filter_map(|name| self.context.model().entity(name).ok())
            .filter(|schema| schema.supports_soft_delete())
            .map(|schema| (schema.name.clone(), schema.keys.marked_for_local_deletion.clone()))
            .collect();

        let mut removed = 0;
        for (entity, key) in targets {
            let predicate = marked_before(&key, cutoff);
            let result = self
                .context
                .perform_and_wait({
                    let entity = entity.clone();
                    move |scope| -> Result<usize> {
                        scope.reset();
                        let count = scope.delete_matching(&entity, Some(predicate))?;
                        if let Err(e) = scope.save() {
                            scope.reset();
                            return Err(e);
                        }
                        Ok(count)
                    }
                })
                .await?;

            match result {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(entity = %entity, count, cutoff, "Removed soft-deleted rows");
                    removed += count;
                }
                Err(e) => {
                    tracing::error!(
                        entity = %entity,
                        "Failed to remove soft-deleted rows: {}",
                        e
                    );
                }
            }
        }

        Ok(removed)
    }

    /// Sweep every `interval` until the handle is dropped.
    ///
    /// The first sweep runs immediately.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::error!(context = %self.context.id(), "Sweep failed: {}", e);
                }
            }
        });

        ReaperHandle { task }
    }
}

/// Keeps a reaper running. Dropping it stops further sweeps.
#[derive(Debug)]
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
