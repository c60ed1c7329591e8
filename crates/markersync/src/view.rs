//! The local, in-memory view of an owner's markers.
//!
//! The view has no durability of its own. It is filled from fetches, grown by
//! the change listener and by local placements, and every merge is keyed on
//! [`MarkerId`] so the same marker arriving twice is kept once.

use tracing::trace;

use crate::marker::{Coordinate, Marker, MarkerId, RemoteId};

/// Ordered set of markers keyed by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerSet {
    markers: Vec<Marker>,
}

impl MarkerSet {
    /// An empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Marker> {
        self.markers.iter()
    }

    /// The markers as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Marker] {
        &self.markers
    }

    /// Whether a marker with this id is present.
    #[must_use]
    pub fn contains(&self, id: &MarkerId) -> bool {
        self.markers.iter().any(|m| m.id() == id)
    }

    /// Look up a marker by id.
    #[must_use]
    pub fn get(&self, id: &MarkerId) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id() == id)
    }

    /// Append `marker` unless one with the same id is already present.
    ///
    /// Returns `true` if the marker was added.
    pub fn merge(&mut self, marker: Marker) -> bool {
        if self.contains(marker.id()) {
            trace!(id = %marker.id(), "Marker already in view");
            return false;
        }
        self.markers.push(marker);
        true
    }

    /// Replace the whole view, dropping duplicate ids.
    pub fn replace_all(&mut self, markers: Vec<Marker>) {
        self.markers.clear();
        for marker in markers {
            self.merge(marker);
        }
    }

    /// Re-key a provisional marker with the id the store assigned.
    ///
    /// If a marker with `remote_id` is already present (the listener got
    /// there first) the provisional entry is dropped instead. Returns `false`
    /// if `provisional` is not in the view.
    pub fn confirm(&mut self, provisional: &MarkerId, remote_id: RemoteId) -> bool {
        let Some(index) = self.position(provisional) else {
            return false;
        };

        if self.contains(&MarkerId::Remote(remote_id.clone())) {
            self.markers.remove(index);
        } else {
            let marker = self.markers.remove(index);
            self.markers.insert(index, marker.confirmed(remote_id));
        }
        true
    }

    /// Remove a marker by id.
    pub fn remove(&mut self, id: &MarkerId) -> Option<Marker> {
        self.position(id).map(|index| self.markers.remove(index))
    }

    /// Move a marker in place. Returns `false` if it is not in the view.
    pub fn relocate(&mut self, id: &MarkerId, coordinate: Coordinate) -> bool {
        match self.position(id) {
            Some(index) => {
                self.markers[index] = self.markers[index].relocated(coordinate);
                true
            }
            None => false,
        }
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.markers.clear();
    }

    fn position(&self, id: &MarkerId) -> Option<usize> {
        self.markers.iter().position(|m| m.id() == id)
    }
}

impl<'a> IntoIterator for &'a MarkerSet {
    type Item = &'a Marker;
    type IntoIter = std::slice::Iter<'a, Marker>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
