//! Integration tests for change observers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_engine::{ChangeKind, ContextUpdate, Entity, EntitySchema, FieldDef, FieldType, Model, Predicate};
use strata_runtime::{ChangeDelegate, ChangeObserver, Context, ManagedEntity, StoreHandle};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Task {
    id: String,
    priority: i64,
}

impl Entity for Task {
    const ENTITY_NAME: &'static str = "Task";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Tag {
    id: String,
}

impl Entity for Tag {
    const ENTITY_NAME: &'static str = "Tag";
}

fn test_model() -> Model {
    Model::new(1)
        .with_entity(EntitySchema::new(
            "Task",
            vec![
                FieldDef::required("id", FieldType::String),
                FieldDef::optional("priority", FieldType::Int),
            ],
        ))
        .with_entity(EntitySchema::new(
            "Tag",
            vec![FieldDef::required("id", FieldType::String)],
        ))
}

/// Forwards every delivered update to a channel.
struct Recorder {
    sender: mpsc::UnboundedSender<ContextUpdate>,
}

impl ChangeDelegate for Recorder {
    fn context_did_change(&self, update: ContextUpdate) {
        let _ = self.sender.send(update);
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<ContextUpdate>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(Recorder { sender }), receiver)
}

async fn next_update(receiver: &mut mpsc::UnboundedReceiver<ContextUpdate>) -> ContextUpdate {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("no update delivered")
        .expect("delegate channel closed")
}

async fn insert_task(context: &Context, id: &'static str, priority: i64) {
    Task::insert(context, move |task| {
        task.id = id.into();
        task.priority = priority;
    })
    .await
    .unwrap();
}

fn ids(update: &ContextUpdate, kind: ChangeKind) -> Vec<String> {
    update
        .get(kind)
        .iter()
        .map(|object| object.values["id"].as_str().unwrap().to_string())
        .collect()
}

#[cfg(test)]
mod observer_tests {
    use super::*;

    #[tokio::test]
    async fn test_only_matching_changes_are_delivered() {
        let store = StoreHandle::in_memory(test_model());
        let observer =
            ChangeObserver::with_entity(store.root_context(), "Task", Predicate::gt("priority", 5)).unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        let background = store.new_background_context();
        insert_task(&background, "low", 3).await;
        insert_task(&background, "high", 9).await;
        background.save_changes().await.unwrap();

        let update = next_update(&mut updates).await;
        assert_eq!(ids(&update, ChangeKind::Inserted), vec!["high"]);
        assert!(update.get(ChangeKind::Updated).is_empty());
        assert!(update.get(ChangeKind::Deleted).is_empty());
    }

    #[tokio::test]
    async fn test_own_saves_are_not_delivered() {
        let store = StoreHandle::in_memory(test_model());
        let root = store.root_context();
        let observer = ChangeObserver::with_entity(root, "Task", Predicate::True).unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        insert_task(root, "own", 9).await;
        root.save_changes().await.unwrap();

        let background = store.new_background_context();
        insert_task(&background, "foreign", 9).await;
        background.save_changes().await.unwrap();

        let update = next_update(&mut updates).await;
        assert_eq!(ids(&update, ChangeKind::Inserted), vec!["foreign"]);
    }

    #[tokio::test]
    async fn test_unmatched_saves_are_skipped() {
        let store = StoreHandle::in_memory(test_model());
        let observer = ChangeObserver::with_entity(store.root_context(), "Tag", Predicate::True).unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        let background = store.new_background_context();
        insert_task(&background, "t1", 9).await;
        background.save_changes().await.unwrap();

        Tag::insert(&background, |tag| tag.id = "urgent".into()).await.unwrap();
        background.save_changes().await.unwrap();

        let update = next_update(&mut updates).await;
        assert_eq!(ids(&update, ChangeKind::Inserted), vec!["urgent"]);
    }

    #[tokio::test]
    async fn test_registrations_accumulate() {
        let store = StoreHandle::in_memory(test_model());
        let observer = ChangeObserver::new(store.root_context());
        assert!(observer.predicate().is_none());

        observer.observe_entity("Tag", Predicate::True).unwrap();
        observer
            .observe_entity("Task", Predicate::eq("priority", 1))
            .unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        let background = store.new_background_context();
        insert_task(&background, "one", 1).await;
        insert_task(&background, "two", 2).await;
        Tag::insert(&background, |tag| tag.id = "tag".into()).await.unwrap();
        background.save_changes().await.unwrap();

        let update = next_update(&mut updates).await;
        let mut inserted = ids(&update, ChangeKind::Inserted);
        inserted.sort();
        assert_eq!(inserted, vec!["one", "tag"]);
    }

    #[tokio::test]
    async fn test_updates_and_deletes_are_grouped() {
        let store = StoreHandle::in_memory(test_model());
        let root = store.root_context();
        insert_task(root, "a", 9).await;
        insert_task(root, "b", 9).await;
        root.save_changes().await.unwrap();

        let observer = ChangeObserver::with_entity(root, "Task", Predicate::True).unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        let background = store.new_background_context();
        let a = Task::find_or_fetch(&background, Predicate::eq("id", "a"))
            .await
            .unwrap()
            .unwrap();
        Task::update(&background, a.object_id, |task| task.priority = 10).await.unwrap();
        Task::delete_all(&background, Some(Predicate::eq("id", "b")), false)
            .await
            .unwrap();
        background.save_changes().await.unwrap();

        let update = next_update(&mut updates).await;
        assert_eq!(ids(&update, ChangeKind::Updated), vec!["a"]);
        assert_eq!(ids(&update, ChangeKind::Deleted), vec!["b"]);
        assert!(update.get(ChangeKind::Updated)[0].changed.contains("priority"));
    }

    struct Panicking;

    impl ChangeDelegate for Panicking {
        fn context_did_change(&self, _update: ContextUpdate) {
            panic!("delegate failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_delegate_does_not_stop_deliveries() {
        let store = StoreHandle::in_memory(test_model());
        let failing = ChangeObserver::with_entity(store.root_context(), "Task", Predicate::True).unwrap();
        let panicking = Arc::new(Panicking);
        failing.set_delegate(&panicking);

        let observer = ChangeObserver::with_entity(store.root_context(), "Task", Predicate::True).unwrap();
        let (delegate, mut updates) = recorder();
        observer.set_delegate(&delegate);

        let background = store.new_background_context();
        insert_task(&background, "first", 1).await;
        background.save_changes().await.unwrap();
        insert_task(&background, "second", 1).await;
        background.save_changes().await.unwrap();

        assert_eq!(ids(&next_update(&mut updates).await, ChangeKind::Inserted), vec!["first"]);
        assert_eq!(ids(&next_update(&mut updates).await, ChangeKind::Inserted), vec!["second"]);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_rejected() {
        let store = StoreHandle::in_memory(test_model());
        let observer = ChangeObserver::new(store.root_context());

        assert!(observer.observe_entity("Missing", Predicate::True).is_err());
        assert!(observer.predicate().is_none());
    }
}
