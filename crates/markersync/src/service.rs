//! Marker sync service.
//!
//! The service ties the collaborators together for one signed-in owner:
//! placements go through the placement rules and the repository, the local
//! view is kept current by fetches and the change listener, and bulk wipes
//! confirm themselves with a fresh fetch.
//!
//! The view lives behind an `Arc<Mutex<_>>` shared with the listener task.
//! The lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geocode::{CoordinateGeocoder, Geocoder, PlaceName};
use crate::listener::{ChangeListener, Subscription};
use crate::marker::{Coordinate, Marker, MarkerId, MarkerKind, OwnerId, RemoteId};
use crate::objects::ObjectStore;
use crate::placement::{self, PlacementPolicy, Reconciliation};
use crate::profile::{OwnerProfile, ProfileRepository};
use crate::repository::MarkerRepository;
use crate::store::DocumentStore;
use crate::view::MarkerSet;

/// A marker the caller wants to place.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDraft {
    /// Where to place it.
    pub coordinate: Coordinate,
    /// What it annotates.
    pub kind: MarkerKind,
}

impl MarkerDraft {
    /// Create a draft.
    #[must_use]
    pub fn new(coordinate: Coordinate, kind: MarkerKind) -> Self {
        Self { coordinate, kind }
    }
}

/// Orchestrates marker sync for the signed-in owner.
#[derive(Debug)]
pub struct MarkerSyncService {
    repository: MarkerRepository,
    profiles: ProfileRepository,
    listener: ChangeListener,
    objects: Arc<dyn ObjectStore>,
    auth: Arc<dyn AuthProvider>,
    geocoder: Arc<dyn Geocoder>,
    policy: PlacementPolicy,
    view: Arc<Mutex<MarkerSet>>,
}

impl MarkerSyncService {
    /// Build a service from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthProvider>,
        config: &Config,
    ) -> Self {
        Self {
            repository: MarkerRepository::new(store.clone()),
            profiles: ProfileRepository::new(store.clone()),
            listener: ChangeListener::new(store),
            objects,
            auth,
            geocoder: Arc::new(CoordinateGeocoder),
            policy: config.placement_policy(),
            view: Arc::new(Mutex::new(MarkerSet::new())),
        }
    }

    /// Use `geocoder` for [`MarkerSyncService::describe_location`].
    #[must_use]
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = geocoder;
        self
    }

    /// The placement thresholds in effect.
    #[must_use]
    pub fn policy(&self) -> &PlacementPolicy {
        &self.policy
    }

    /// The signed-in owner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] when nobody is signed in.
    pub fn owner(&self) -> Result<OwnerId> {
        self.auth.require_owner()
    }

    /// Snapshot of the local view.
    #[must_use]
    pub fn markers(&self) -> Vec<Marker> {
        self.view().as_slice().to_vec()
    }

    /// Notes and photos near `center`, nearest first, with their distance in
    /// meters.
    #[must_use]
    pub fn nearby(&self, center: Coordinate, limit: usize) -> Vec<(Marker, f64)> {
        let policy = PlacementPolicy {
            nearby_limit: limit,
            ..self.policy
        };
        let view = self.view();
        let found = policy
            .nearby(view.iter(), center)
            .into_iter()
            .map(|(marker, distance)| (marker.clone(), distance))
            .collect();
        found
    }

    /// Place a marker.
    ///
    /// The marker shows up in the view immediately under a provisional id,
    /// which is swapped for the store id once the write succeeds. A failed
    /// write takes the provisional entry back out.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] when nobody is signed in
    /// - [`Error::InvalidCoordinate`] for an out-of-range coordinate
    /// - [`Error::PlacementConflict`] when a marker of the same kind already
    ///   sits at exactly this coordinate
    /// - [`Error::WriteFailure`] when the store rejects the write
    pub async fn place_marker(&self, draft: MarkerDraft) -> Result<Marker> {
        let owner = self.owner()?;
        placement::validate_coordinate(draft.coordinate)?;

        let marker = Marker::provisional(draft.coordinate, draft.kind);
        {
            let mut view = self.view();
            if !placement::can_place(marker.kind(), marker.coordinate(), view.iter()) {
                debug!(%owner, coordinate = %marker.coordinate(), "Marker already exists at this location");
                return Err(Error::PlacementConflict {
                    kind: marker.kind().tag(),
                    latitude: marker.coordinate().latitude,
                    longitude: marker.coordinate().longitude,
                });
            }
            view.merge(marker.clone());
        }

        match self.repository.create(&owner, &marker).await {
            Ok(remote_id) => {
                self.view().confirm(marker.id(), remote_id.clone());
                Ok(marker.confirmed(remote_id))
            }
            Err(e) => {
                self.view().remove(marker.id());
                Err(e)
            }
        }
    }

    /// Upload `images` and place a photo marker referencing them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upload`] if there are no images or any upload fails
    /// (no marker is written then), otherwise the errors of
    /// [`MarkerSyncService::place_marker`].
    pub async fn place_photo(&self, coordinate: Coordinate, images: Vec<Vec<u8>>) -> Result<Marker> {
        let owner = self.owner()?;
        placement::validate_coordinate(coordinate)?;
        if images.is_empty() {
            return Err(Error::Upload("no images to upload".to_string()));
        }

        let mut image_urls = Vec::with_capacity(images.len());
        for bytes in images {
            image_urls.push(self.objects.upload(bytes).await?);
        }
        debug!(%owner, count = image_urls.len(), "Photos uploaded");

        self.place_marker(MarkerDraft::new(coordinate, MarkerKind::Photo { image_urls }))
            .await
    }

    /// Replace the view with the owner's stored markers.
    ///
    /// Returns the number of markers now in the view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] or [`Error::FetchFailure`]; the view
    /// is left as it was.
    pub async fn refresh(&self) -> Result<usize> {
        let owner = self.owner()?;
        let markers = self.repository.fetch_all(&owner).await?;
        let mut view = self.view();
        view.replace_all(markers);
        Ok(view.len())
    }

    /// Delete a marker. It leaves the view only if the store delete worked.
    pub async fn delete_marker(&self, marker: &Marker) -> bool {
        let Some(owner) = self.owner_or_warn("delete marker") else {
            return false;
        };
        if self.repository.delete(&owner, marker).await {
            self.view().remove(marker.id());
            true
        } else {
            false
        }
    }

    /// Delete a marker by store id. It leaves the view only if the store
    /// delete worked.
    pub async fn delete_by_id(&self, remote_id: &RemoteId) -> bool {
        let Some(owner) = self.owner_or_warn("delete marker") else {
            return false;
        };
        if self.repository.delete_by_id(&owner, remote_id).await {
            self.view().remove(&MarkerId::Remote(remote_id.clone()));
            true
        } else {
            false
        }
    }

    /// Move a stored marker, updating the view on success.
    pub async fn move_marker(&self, remote_id: &RemoteId, coordinate: Coordinate) -> bool {
        let Some(owner) = self.owner_or_warn("move marker") else {
            return false;
        };
        if self
            .repository
            .update_location(&owner, remote_id, coordinate)
            .await
        {
            self.view()
                .relocate(&MarkerId::Remote(remote_id.clone()), coordinate);
            true
        } else {
            false
        }
    }

    /// Delete every marker of the owner, then re-read the collection.
    ///
    /// Returns `false` if the delete failed; the view is untouched then. A
    /// failing re-read after a successful delete is only logged.
    pub async fn wipe_all(&self) -> bool {
        let Some(owner) = self.owner_or_warn("delete all markers") else {
            return false;
        };

        if !self.repository.delete_all(&owner).await {
            return false;
        }

        match self.repository.fetch_all(&owner).await {
            Ok(markers) => {
                if !markers.is_empty() {
                    warn!(%owner, "{} markers still present after wipe", markers.len());
                }
                self.view().replace_all(markers);
            }
            Err(e) => warn!(%owner, error = %e, "Error re-reading markers after wipe"),
        }
        true
    }

    /// Check a saved marker against the coordinate the device reports for
    /// it, snapping it back and re-saving it when it drifted too far.
    ///
    /// Returns the marker as it should now be shown. Provisional markers are
    /// snapped in the view but not written.
    pub async fn reconcile_placement(&self, marker: &Marker, device: Coordinate) -> Marker {
        match self.restore_drifted(marker, device).await {
            Some((shown, _)) => shown,
            None => marker.clone(),
        }
    }

    /// Reconcile every marker in the view against one device coordinate.
    ///
    /// Returns how many drifted markers were restored and saved. A marker
    /// whose re-save failed is still snapped in the view but not counted.
    pub async fn reconcile_all(&self, device: Coordinate) -> usize {
        let mut restored = 0;
        for marker in self.markers() {
            if let Some((_, true)) = self.restore_drifted(&marker, device).await {
                restored += 1;
            }
        }
        restored
    }

    /// Snap `marker` back to its saved location if it drifted.
    ///
    /// Returns `None` when it is in range, otherwise the marker as now shown
    /// and whether the location was saved.
    async fn restore_drifted(
        &self,
        marker: &Marker,
        device: Coordinate,
    ) -> Option<(Marker, bool)> {
        let Reconciliation::Resync {
            coordinate,
            distance_meters,
        } = self.policy.reconcile(marker, device)
        else {
            return None;
        };

        info!(
            id = %marker.id(),
            distance = %placement::format_distance(distance_meters),
            "Marker drifted, restoring saved location"
        );
        self.view().relocate(marker.id(), coordinate);
        let saved = self.save_restored_location(marker, coordinate).await;
        Some((marker.relocated(coordinate), saved))
    }

    /// Write a snapped-back location to the store.
    ///
    /// Provisional markers have nothing to write and count as saved.
    async fn save_restored_location(&self, marker: &Marker, coordinate: Coordinate) -> bool {
        let Some(remote_id) = marker.remote_id() else {
            return true;
        };
        let Some(owner) = self.owner_or_warn("re-save marker location") else {
            return false;
        };
        let saved = self
            .repository
            .update_location(&owner, remote_id, coordinate)
            .await;
        if saved {
            debug!(id = %remote_id, "Restored location saved");
        } else {
            warn!(id = %remote_id, "Restored location shown but not saved");
        }
        saved
    }

    /// Start merging live additions into the view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] or [`Error::FetchFailure`].
    pub async fn start_listening(&self) -> Result<Subscription> {
        self.start_listening_with(|_| {}).await
    }

    /// Like [`MarkerSyncService::start_listening`], also calling `on_new` for
    /// every marker that was not in the view yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] or [`Error::FetchFailure`].
    pub async fn start_listening_with<F>(&self, mut on_new: F) -> Result<Subscription>
    where
        F: FnMut(&Marker) + Send + 'static,
    {
        let owner = self.owner()?;
        let view = Arc::clone(&self.view);
        self.listener
            .subscribe(&owner, move |marker| {
                let added = lock(&view).merge(marker.clone());
                if added {
                    on_new(&marker);
                }
            })
            .await
    }

    /// Create the signed-in owner's profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] or [`Error::WriteFailure`].
    pub async fn register_owner(&self, email: &str) -> Result<OwnerProfile> {
        let owner = self.owner()?;
        self.profiles.register(&owner, email).await
    }

    /// The signed-in owner's profile, if registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`], [`Error::FetchFailure`] or
    /// [`Error::MalformedRecord`].
    pub async fn owner_profile(&self) -> Result<Option<OwnerProfile>> {
        let owner = self.owner()?;
        self.profiles.get(&owner).await
    }

    /// A display name for `coordinate`. Falls back to the coordinate itself.
    pub async fn describe_location(&self, coordinate: Coordinate) -> PlaceName {
        match self.geocoder.reverse(coordinate).await {
            Ok(place) => place,
            Err(e) => {
                warn!(%coordinate, error = %e, "Reverse geocoding failed");
                PlaceName {
                    name: coordinate.to_string(),
                    locality: None,
                }
            }
        }
    }

    fn owner_or_warn(&self, action: &str) -> Option<OwnerId> {
        let owner = self.auth.current_owner_id();
        if owner.is_none() {
            warn!("Cannot {action}: no authenticated owner");
        }
        owner
    }

    fn view(&self) -> MutexGuard<'_, MarkerSet> {
        lock(&self.view)
    }
}

fn lock(view: &Mutex<MarkerSet>) -> MutexGuard<'_, MarkerSet> {
    // Every mutation of the set completes before its guard drops, so a
    // poisoned lock still guards a consistent value.
    view.lock().unwrap_or_else(PoisonError::into_inner)
}
