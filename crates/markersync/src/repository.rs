//! Marker persistence against a [`DocumentStore`].
//!
//! The repository is a thin, stateless layer: it validates, encodes and
//! decodes, and translates store errors into the sync error taxonomy. It never
//! touches the caller's local view.

use std::sync::Arc;

use serde_json::{json, Map};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::marker::{Coordinate, Marker, MarkerDocument, OwnerId, RemoteId};
use crate::store::DocumentStore;

/// CRUD operations on one owner's marker collection.
#[derive(Debug, Clone)]
pub struct MarkerRepository {
    store: Arc<dyn DocumentStore>,
}

impl MarkerRepository {
    /// Create a repository on top of a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Persist a marker and return the id the store assigned to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinate`] without writing anything if the
    /// coordinate is out of range, or [`Error::WriteFailure`] if the store
    /// rejects the insert.
    pub async fn create(&self, owner: &OwnerId, marker: &Marker) -> Result<RemoteId> {
        let coordinate = marker.coordinate();
        if !coordinate.is_valid() {
            warn!(%owner, %coordinate, "Refusing to save marker with invalid coordinate");
            return Err(Error::InvalidCoordinate {
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
            });
        }

        let document = MarkerDocument::from_marker(marker).to_value()?;
        debug!(%owner, kind = %marker.kind(), "Saving marker");

        let doc_id = self
            .store
            .insert(&owner.markers_collection(), document)
            .await
            .map_err(|e| {
                warn!(%owner, error = %e, "Error saving marker");
                Error::write_failure(owner.as_str(), e.to_string())
            })?;

        info!(%owner, doc_id = %doc_id, "Marker saved");
        Ok(RemoteId::new(doc_id))
    }

    /// Every well-formed marker in the owner's collection.
    ///
    /// Malformed documents are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FetchFailure`] if the collection cannot be read.
    pub async fn fetch_all(&self, owner: &OwnerId) -> Result<Vec<Marker>> {
        let documents = self
            .store
            .list(&owner.markers_collection())
            .await
            .map_err(|e| {
                warn!(%owner, error = %e, "Error fetching markers");
                Error::fetch_failure(owner.as_str(), e.to_string())
            })?;

        let total = documents.len();
        let markers: Vec<Marker> = documents
            .into_iter()
            .filter_map(|doc| match MarkerDocument::decode(&doc.id, &doc.data) {
                Ok(marker) => Some(marker),
                Err(e) => {
                    warn!(%owner, error = %e, "Skipping invalid marker data");
                    None
                }
            })
            .collect();

        if markers.len() < total {
            info!(
                %owner,
                "Fetched {} markers ({} skipped)",
                markers.len(),
                total - markers.len()
            );
        } else {
            debug!(%owner, "Fetched {} markers", markers.len());
        }
        Ok(markers)
    }

    /// Move a stored marker. Returns `false` on any failure.
    pub async fn update_location(
        &self,
        owner: &OwnerId,
        remote_id: &RemoteId,
        coordinate: Coordinate,
    ) -> bool {
        if !coordinate.is_valid() {
            warn!(%owner, %remote_id, %coordinate, "Refusing to move marker to invalid coordinate");
            return false;
        }

        let mut fields = Map::new();
        fields.insert("latitude".to_string(), json!(coordinate.latitude));
        fields.insert("longitude".to_string(), json!(coordinate.longitude));

        match self
            .store
            .update_fields(&owner.markers_collection(), remote_id.as_str(), fields)
            .await
        {
            Ok(true) => {
                debug!(%owner, %remote_id, %coordinate, "Marker location updated");
                true
            }
            Ok(false) => {
                warn!(%owner, %remote_id, "Cannot update location of missing marker");
                false
            }
            Err(e) => {
                warn!(%owner, %remote_id, error = %e, "Error updating marker location");
                false
            }
        }
    }

    /// Delete a marker. Returns `false` if it was never persisted or the
    /// store could not delete it.
    pub async fn delete(&self, owner: &OwnerId, marker: &Marker) -> bool {
        let Some(remote_id) = marker.remote_id() else {
            warn!(%owner, id = %marker.id(), "Marker does not have a store id");
            return false;
        };
        self.delete_by_id(owner, remote_id).await
    }

    /// Delete a marker by store id. Returns `false` on any failure.
    pub async fn delete_by_id(&self, owner: &OwnerId, remote_id: &RemoteId) -> bool {
        match self
            .store
            .delete(&owner.markers_collection(), remote_id.as_str())
            .await
        {
            Ok(true) => {
                info!(%owner, %remote_id, "Marker deleted");
                true
            }
            Ok(false) => {
                warn!(%owner, %remote_id, "Marker to delete was not found");
                false
            }
            Err(e) => {
                warn!(%owner, %remote_id, error = %e, "Error deleting marker");
                false
            }
        }
    }

    /// Delete every marker of the owner in one atomic batch.
    ///
    /// Returns `false` if listing or the batch fails; a failed batch removes
    /// nothing.
    pub async fn delete_all(&self, owner: &OwnerId) -> bool {
        match self.try_delete_all(owner).await {
            Ok(removed) => {
                info!(%owner, "All markers deleted ({} removed)", removed);
                true
            }
            Err(e) => {
                warn!(%owner, error = %e, "Error deleting all markers");
                false
            }
        }
    }

    async fn try_delete_all(&self, owner: &OwnerId) -> Result<usize> {
        let collection = owner.markers_collection();
        let doc_ids: Vec<String> = self
            .store
            .list(&collection)
            .await
            .map_err(|e| Error::fetch_failure(owner.as_str(), e.to_string()))?
            .into_iter()
            .map(|doc| doc.id)
            .collect();

        if doc_ids.is_empty() {
            return Ok(0);
        }

        self.store
            .delete_batch(&collection, &doc_ids)
            .await
            .map_err(|e| Error::delete_failure(owner.as_str(), e.to_string()))
    }
}
