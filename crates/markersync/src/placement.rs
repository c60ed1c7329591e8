//! Placement rules for markers.
//!
//! - **Uniqueness**: at most one marker of a given kind per exact coordinate.
//! - **Drift**: a saved marker whose coordinate is farther than a threshold
//!   from where the device now reports it is snapped back and re-saved.
//! - **Nearby**: notes and photos close to a point, nearest first.
//!
//! Distances are great-circle (haversine) distances in meters on a sphere of
//! the mean Earth radius.

use crate::error::{Error, Result};
use crate::marker::{Coordinate, Marker, MarkerKind};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Default drift threshold in meters.
pub const DEFAULT_DRIFT_THRESHOLD_METERS: f64 = 100.0;

/// Default radius for nearby lookups in meters.
pub const DEFAULT_NEARBY_RADIUS_METERS: f64 = 1_000.0;

/// Default number of markers returned by nearby lookups.
pub const DEFAULT_NEARBY_LIMIT: usize = 4;

/// Reject out-of-range coordinates.
///
/// # Errors
///
/// Returns [`Error::InvalidCoordinate`] when latitude or longitude is out of
/// range or not a number.
pub fn validate_coordinate(coordinate: Coordinate) -> Result<()> {
    if coordinate.is_valid() {
        Ok(())
    } else {
        Err(Error::InvalidCoordinate {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
        })
    }
}

/// Great-circle distance between two coordinates, in meters.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Whether a marker of `kind` may be placed at `coordinate`.
///
/// False iff a marker of the same kind sits at exactly the same coordinate.
pub fn can_place<'a>(
    kind: &MarkerKind,
    coordinate: Coordinate,
    existing: impl IntoIterator<Item = &'a Marker>,
) -> bool {
    !existing
        .into_iter()
        .any(|m| m.kind().same_kind(kind) && m.coordinate().same_position(&coordinate))
}

/// Whether `current` lies within `threshold_meters` of `saved` (inclusive).
#[must_use]
pub fn is_near_saved_location(saved: Coordinate, current: Coordinate, threshold_meters: f64) -> bool {
    distance_meters(saved, current) <= threshold_meters
}

/// Outcome of checking a saved marker against the device's coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// The marker is within the threshold; nothing to do.
    InRange,
    /// The marker drifted; show it at `coordinate` and persist it there again.
    Resync {
        /// The marker's saved coordinate.
        coordinate: Coordinate,
        /// How far the device coordinate was from it.
        distance_meters: f64,
    },
}

/// Decide whether a saved marker needs to be snapped back.
#[must_use]
pub fn reconcile(marker: &Marker, device: Coordinate, threshold_meters: f64) -> Reconciliation {
    let saved = marker.coordinate();
    let distance = distance_meters(saved, device);
    if distance <= threshold_meters {
        Reconciliation::InRange
    } else {
        Reconciliation::Resync {
            coordinate: saved,
            distance_meters: distance,
        }
    }
}

/// Notes and photos within `radius_meters` of `center`, nearest first.
pub fn nearby<'a>(
    markers: impl IntoIterator<Item = &'a Marker>,
    center: Coordinate,
    radius_meters: f64,
    limit: usize,
) -> Vec<(&'a Marker, f64)> {
    let mut found: Vec<(&Marker, f64)> = markers
        .into_iter()
        .filter(|m| matches!(m.kind(), MarkerKind::Note { .. } | MarkerKind::Photo { .. }))
        .map(|m| (m, distance_meters(center, m.coordinate())))
        .filter(|(_, d)| *d <= radius_meters)
        .collect();

    found.sort_by(|a, b| a.1.total_cmp(&b.1));
    found.truncate(limit);
    found
}

/// Human-readable distance: meters below 1 km, kilometers above.
#[must_use]
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// Placement thresholds bundled for the service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementPolicy {
    /// Drift threshold in meters.
    pub drift_threshold_meters: f64,
    /// Radius for nearby lookups in meters.
    pub nearby_radius_meters: f64,
    /// Maximum nearby results.
    pub nearby_limit: usize,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            drift_threshold_meters: DEFAULT_DRIFT_THRESHOLD_METERS,
            nearby_radius_meters: DEFAULT_NEARBY_RADIUS_METERS,
            nearby_limit: DEFAULT_NEARBY_LIMIT,
        }
    }
}

impl PlacementPolicy {
    /// [`reconcile`] with this policy's threshold.
    #[must_use]
    pub fn reconcile(&self, marker: &Marker, device: Coordinate) -> Reconciliation {
        reconcile(marker, device, self.drift_threshold_meters)
    }

    /// [`is_near_saved_location`] with this policy's threshold.
    #[must_use]
    pub fn is_near_saved_location(&self, saved: Coordinate, current: Coordinate) -> bool {
        is_near_saved_location(saved, current, self.drift_threshold_meters)
    }

    /// [`nearby`] with this policy's radius and limit.
    pub fn nearby<'a>(
        &self,
        markers: impl IntoIterator<Item = &'a Marker>,
        center: Coordinate,
    ) -> Vec<(&'a Marker, f64)> {
        nearby(markers, center, self.nearby_radius_meters, self.nearby_limit)
    }
}

/// How a marker kind is drawn on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerSymbol {
    /// SF Symbols style glyph name.
    pub glyph: &'static str,
    /// Tint colour name.
    pub color: &'static str,
}

impl MarkerSymbol {
    /// Symbol for photo markers.
    pub const PHOTO: Self = Self {
        glyph: "photo.artframe.circle",
        color: "orange",
    };
    /// Symbol for sighting markers.
    pub const SIGHTING: Self = Self {
        glyph: "car.rear.waves.up",
        color: "blue",
    };
    /// Symbol for note markers; also the fallback.
    pub const NOTE: Self = Self {
        glyph: "receipt.fill",
        color: "brown",
    };

    /// The symbol for a marker kind.
    #[must_use]
    pub fn for_kind(kind: &MarkerKind) -> Self {
        match kind {
            MarkerKind::Sighting => Self::SIGHTING,
            MarkerKind::Note { .. } => Self::NOTE,
            MarkerKind::Photo { .. } => Self::PHOTO,
        }
    }
}
