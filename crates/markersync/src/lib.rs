//! `markersync` - Synchronization core for geotagged map markers
//!
//! This library keeps a per-owner collection of map markers (sightings, notes
//! and photos) in a document store, mirrors it into an in-memory view, and
//! keeps that view current through a live change listener.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod geocode;
pub mod listener;
pub mod logging;
pub mod marker;
pub mod objects;
pub mod placement;
pub mod profile;
pub mod repository;
pub mod service;
pub mod store;
pub mod view;

pub use auth::{AuthProvider, StaticAuth};
pub use config::Config;
pub use error::{Error, Result};
pub use geocode::{CoordinateGeocoder, Geocoder, PlaceName};
pub use listener::{ChangeListener, Subscription};
pub use logging::init_logging;
pub use marker::{Coordinate, Marker, MarkerDocument, MarkerId, MarkerKind, OwnerId, RemoteId};
pub use objects::{FsObjectStore, ObjectStore};
pub use placement::{MarkerSymbol, PlacementPolicy, Reconciliation};
pub use profile::{OwnerProfile, ProfileRepository};
pub use repository::MarkerRepository;
pub use service::{MarkerDraft, MarkerSyncService};
pub use store::{DocumentStore, SqliteStore};
pub use view::MarkerSet;
