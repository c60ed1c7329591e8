//! Live change listener for an owner's marker collection.
//!
//! A subscription first replays the documents already in the collection as
//! additions, then forwards every `Added` event the store publishes. Each
//! remote id is delivered at most once per subscription, so a document that
//! shows up both in the replay and in the live feed reaches the callback once.
//!
//! A listener that falls behind the feed re-reads the collection, so no
//! addition is lost; the seen-set filters out what was already delivered.
//!
//! The listener task owns the callback and runs until the [`Subscription`] is
//! cancelled or dropped, or until the store's change feed closes.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::marker::{Marker, MarkerDocument, OwnerId};
use crate::store::{ChangeEvent, ChangeKind, DocumentStore, StoredDocument};

/// Starts change subscriptions against a document store.
#[derive(Debug, Clone)]
pub struct ChangeListener {
    store: Arc<dyn DocumentStore>,
}

impl ChangeListener {
    /// Create a listener on top of a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Watch `owner`'s markers, calling `on_added` for each new marker.
    ///
    /// The change feed is subscribed before the existing documents are read,
    /// so nothing written in between is missed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FetchFailure`] if the existing documents cannot be
    /// read. No task is started in that case.
    pub async fn subscribe<F>(&self, owner: &OwnerId, on_added: F) -> Result<Subscription>
    where
        F: FnMut(Marker) + Send + 'static,
    {
        let collection = owner.markers_collection();
        let feed = self.store.changes();

        let snapshot = self.store.list(&collection).await.map_err(|e| {
            warn!(%owner, error = %e, "Error reading markers for listener");
            Error::fetch_failure(owner.as_str(), e.to_string())
        })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker = Worker {
            store: Arc::clone(&self.store),
            owner: owner.clone(),
            collection,
            seen: HashSet::new(),
            on_added,
        };
        let handle = tokio::spawn(worker.run(snapshot, feed, cancel_rx));

        info!(%owner, "Listening for marker changes");
        Ok(Subscription {
            owner: owner.clone(),
            cancel: cancel_tx,
            handle: Some(handle),
        })
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle stops the listener as well.
#[derive(Debug)]
pub struct Subscription {
    owner: OwnerId,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// The owner being watched.
    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Signal the listener to stop. No callback starts after the task
    /// observes the signal.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Whether the listener task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the listener and wait until its task has exited.
    pub async fn cancel_and_wait(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(owner = %self.owner, error = %e, "Listener task ended abnormally");
            }
        }
    }
}

struct Worker<F> {
    store: Arc<dyn DocumentStore>,
    owner: OwnerId,
    collection: String,
    seen: HashSet<String>,
    on_added: F,
}

impl<F> Worker<F>
where
    F: FnMut(Marker) + Send + 'static,
{
    async fn run(
        mut self,
        snapshot: Vec<StoredDocument>,
        mut feed: broadcast::Receiver<ChangeEvent>,
        mut cancel: watch::Receiver<bool>,
    ) {
        for doc in snapshot {
            if *cancel.borrow() {
                debug!(owner = %self.owner, "Listener cancelled during replay");
                return;
            }
            self.deliver(&doc.id, &doc.data);
        }

        loop {
            tokio::select! {
                biased;

                changed = cancel.changed() => {
                    // A dropped sender means the subscription handle is gone.
                    if changed.is_err() || *cancel.borrow() {
                        debug!(owner = %self.owner, "Listener cancelled");
                        break;
                    }
                }
                event = feed.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(owner = %self.owner, skipped, "Listener fell behind the change feed");
                        self.catch_up().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(owner = %self.owner, "Change feed closed");
                        break;
                    }
                },
            }
        }
    }

    /// Re-read the collection after missing feed events.
    async fn catch_up(&mut self) {
        match self.store.list(&self.collection).await {
            Ok(docs) => {
                for doc in docs {
                    self.deliver(&doc.id, &doc.data);
                }
            }
            Err(e) => warn!(owner = %self.owner, error = %e, "Error re-reading markers after lag"),
        }
    }

    fn handle_event(&mut self, event: &ChangeEvent) {
        if event.collection != self.collection || event.kind != ChangeKind::Added {
            return;
        }
        match &event.data {
            Some(data) => self.deliver(&event.doc_id, data),
            None => warn!(owner = %self.owner, doc_id = %event.doc_id, "Added event without data"),
        }
    }

    fn deliver(&mut self, doc_id: &str, data: &serde_json::Value) {
        if self.seen.contains(doc_id) {
            trace!(owner = %self.owner, doc_id, "Marker already delivered");
            return;
        }
        match MarkerDocument::decode(doc_id, data) {
            Ok(marker) => {
                self.seen.insert(doc_id.to_string());
                trace!(owner = %self.owner, doc_id, "Marker added");
                (self.on_added)(marker);
            }
            Err(e) => warn!(owner = %self.owner, error = %e, "Skipping invalid marker data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::store::SqliteStore;

    fn doc(lat: f64, lon: f64) -> serde_json::Value {
        json!({"type": "sighting", "latitude": lat, "longitude": lon})
    }

    fn setup() -> (Arc<SqliteStore>, ChangeListener, OwnerId) {
        crate::logging::init_test_logging();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let listener = ChangeListener::new(store.clone());
        (store, listener, OwnerId::new("owner"))
    }

    async fn next_id(rx: &mut mpsc::UnboundedReceiver<Marker>) -> String {
        let marker = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for marker")
            .expect("channel closed");
        marker.id().to_string()
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Marker>) {
        let extra = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err(), "unexpected delivery: {extra:?}");
    }

    fn collector() -> (
        impl FnMut(Marker) + Send + 'static,
        mpsc::UnboundedReceiver<Marker>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |marker| {
                let _ = tx.send(marker);
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_replays_existing_then_live_additions() {
        let (store, listener, owner) = setup();
        let collection = owner.markers_collection();
        let first = store.insert(&collection, doc(1.0, 1.0)).await.unwrap();

        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();
        assert_eq!(next_id(&mut rx).await, first);

        let second = store.insert(&collection, doc(2.0, 2.0)).await.unwrap();
        assert_eq!(next_id(&mut rx).await, second);

        sub.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_same_id_delivered_once() {
        let (store, listener, owner) = setup();
        let collection = owner.markers_collection();
        store.set(&collection, "a", doc(1.0, 1.0)).await.unwrap();

        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();
        assert_eq!(next_id(&mut rx).await, "a");

        store.delete(&collection, "a").await.unwrap();
        store.set(&collection, "a", doc(1.0, 1.0)).await.unwrap();
        store.set(&collection, "b", doc(2.0, 2.0)).await.unwrap();

        assert_eq!(next_id(&mut rx).await, "b");
        assert_quiet(&mut rx).await;
        sub.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_ignores_other_owners_and_non_additions() {
        let (store, listener, owner) = setup();
        let collection = owner.markers_collection();

        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();

        store
            .insert(&OwnerId::new("someone-else").markers_collection(), doc(0.0, 0.0))
            .await
            .unwrap();
        let id = store.insert(&collection, doc(3.0, 3.0)).await.unwrap();
        assert_eq!(next_id(&mut rx).await, id);

        let mut fields = serde_json::Map::new();
        fields.insert("latitude".into(), json!(4.0));
        store.update_fields(&collection, &id, fields).await.unwrap();
        store.delete(&collection, &id).await.unwrap();

        assert_quiet(&mut rx).await;
        sub.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_malformed_documents_are_skipped() {
        let (store, listener, owner) = setup();
        let collection = owner.markers_collection();
        store
            .insert(&collection, json!({"type": "sighting"}))
            .await
            .unwrap();

        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();

        store
            .insert(&collection, json!({"latitude": 200.0, "longitude": 0.0, "type": "note"}))
            .await
            .unwrap();
        let good = store.insert(&collection, doc(5.0, 5.0)).await.unwrap();

        assert_eq!(next_id(&mut rx).await, good);
        assert!(sub.is_active());
        sub.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_no_delivery_after_cancel() {
        let (store, listener, owner) = setup();
        let collection = owner.markers_collection();

        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();
        sub.cancel_and_wait().await;

        store.insert(&collection, doc(1.0, 1.0)).await.unwrap();
        // The callback (and its sender) went away with the task.
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_stops_listener() {
        let (store, listener, owner) = setup();
        let (on_added, mut rx) = collector();
        let sub = listener.subscribe(&owner, on_added).await.unwrap();
        drop(sub);

        store
            .insert(&owner.markers_collection(), doc(1.0, 1.0))
            .await
            .unwrap();
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_fails_when_store_unreadable() {
        use crate::store::testing::FlakyStore;
        use std::sync::atomic::Ordering;

        let store = Arc::new(FlakyStore::new());
        store.fail_reads.store(true, Ordering::SeqCst);
        let listener = ChangeListener::new(store);

        let (on_added, _rx) = collector();
        let err = listener
            .subscribe(&OwnerId::new("o"), on_added)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchFailure { .. }));
    }

    #[tokio::test]
    async fn test_delivers_additions_from_another_connection() {
        crate::logging::init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.db");
        let watching = Arc::new(
            SqliteStore::open(&path)
                .unwrap()
                .with_poll_interval(Duration::from_millis(20)),
        );
        let writing = crate::repository::MarkerRepository::new(Arc::new(
            SqliteStore::open(&path).unwrap(),
        ));
        let owner = OwnerId::new("owner");

        let (on_added, mut rx) = collector();
        let sub = ChangeListener::new(watching)
            .subscribe(&owner, on_added)
            .await
            .unwrap();

        let marker = Marker::provisional(
            crate::marker::Coordinate::new(4.0, 4.0),
            crate::marker::MarkerKind::Sighting,
        );
        let id = writing.create(&owner, &marker).await.unwrap();

        assert_eq!(next_id(&mut rx).await, id.as_str());
        assert_quiet(&mut rx).await;
        sub.cancel_and_wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_catches_up_after_falling_behind() {
        crate::logging::init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(SqliteStore::open_with_capacity(dir.path().join("markers.db"), 2).unwrap());
        let owner = OwnerId::new("owner");
        let collection = owner.markers_collection();

        // The first delivery blocks until released, so the feed overflows.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let mut gate = Some(gate_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = ChangeListener::new(store.clone())
            .subscribe(&owner, move |marker: Marker| {
                let _ = tx.send(marker);
                if let Some(gate) = gate.take() {
                    let _ = gate.recv();
                }
            })
            .await
            .unwrap();

        let mut stored = vec![store.insert(&collection, doc(0.0, 0.0)).await.unwrap()];
        let mut delivered = vec![next_id(&mut rx).await];
        for i in 1..10 {
            let lat = f64::from(i);
            stored.push(store.insert(&collection, doc(lat, lat)).await.unwrap());
        }
        gate_tx.send(()).unwrap();

        for _ in 1..10 {
            delivered.push(next_id(&mut rx).await);
        }
        assert_quiet(&mut rx).await;

        delivered.sort();
        stored.sort();
        assert_eq!(delivered, stored);
        sub.cancel_and_wait().await;
    }
}
