//! Reverse geocoding for display.
//!
//! Place names are presentation only and never stored with a marker.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::marker::Coordinate;

/// A human-readable description of a place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceName {
    /// Primary line, e.g. a street address.
    pub name: String,
    /// Optional locality or region.
    pub locality: Option<String>,
}

impl std::fmt::Display for PlaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.locality {
            Some(locality) => write!(f, "{}, {locality}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Turns a coordinate into a place name.
#[async_trait]
pub trait Geocoder: Send + Sync + std::fmt::Debug {
    /// Describe `coordinate`.
    async fn reverse(&self, coordinate: Coordinate) -> Result<PlaceName>;
}

/// Offline geocoder that describes a coordinate by its hemisphere-qualified
/// degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateGeocoder;

#[async_trait]
impl Geocoder for CoordinateGeocoder {
    async fn reverse(&self, coordinate: Coordinate) -> Result<PlaceName> {
        crate::placement::validate_coordinate(coordinate)?;

        let ns = if coordinate.latitude >= 0.0 { 'N' } else { 'S' };
        let ew = if coordinate.longitude >= 0.0 { 'E' } else { 'W' };
        Ok(PlaceName {
            name: format!(
                "{:.5}°{ns} {:.5}°{ew}",
                coordinate.latitude.abs(),
                coordinate.longitude.abs()
            ),
            locality: None,
        })
    }
}
