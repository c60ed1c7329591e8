//! Core marker types.
//!
//! A [`Marker`] is a geotagged annotation owned by one user. Its identity is
//! provisional until the document store assigns an id, and from then on the
//! store id is the only identity the marker ever has.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Collection holding one profile document per owner.
pub const USERS_COLLECTION: &str = "users";

/// Identifier of the user owning a marker collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection path holding the owner's markers.
    #[must_use]
    pub fn markers_collection(&self) -> String {
        format!("{USERS_COLLECTION}/{}/markers", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier assigned to a marker document by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Wrap a store-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of a marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "id")]
pub enum MarkerId {
    /// Client-side id of a marker whose write has not been confirmed.
    Provisional(Uuid),
    /// Store-assigned id of a persisted marker.
    Remote(RemoteId),
}

impl MarkerId {
    /// A fresh provisional id.
    #[must_use]
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    /// The store id, if the marker has been persisted.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(uuid) => write!(f, "provisional:{uuid}"),
            Self::Remote(id) => write!(f, "{id}"),
        }
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, -90..=90.
    pub latitude: f64,
    /// Longitude, -180..=180.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate without validating it.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are within range. NaN is never valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Exact component-wise equality, the rule used for placement uniqueness.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_position(&self, other: &Self) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Wire tag for sighting markers.
pub const TAG_SIGHTING: &str = "sighting";
/// Wire tag for note markers.
pub const TAG_NOTE: &str = "note";
/// Wire tag for photo markers.
pub const TAG_PHOTO: &str = "photo";

/// What a marker annotates, with the fields that kind carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MarkerKind {
    /// A police sighting. Carries no payload.
    Sighting,
    /// A free-text note.
    Note {
        /// Note text, if any was entered.
        text: Option<String>,
    },
    /// One or more uploaded photos.
    Photo {
        /// Download URLs, in upload order.
        image_urls: Vec<String>,
    },
}

impl MarkerKind {
    /// The wire tag for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sighting => TAG_SIGHTING,
            Self::Note { .. } => TAG_NOTE,
            Self::Photo { .. } => TAG_PHOTO,
        }
    }

    /// Whether two kinds are the same variant, ignoring payloads.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Build a kind from a wire tag and the optional payload fields.
    ///
    /// Legacy tags (`isCop`, `isNote`, `isImage`) are accepted. Unknown tags
    /// degrade to a note so the marker still renders.
    #[must_use]
    pub fn from_tag(tag: &str, note: Option<String>, image_urls: Vec<String>) -> Self {
        match tag {
            TAG_SIGHTING | "isCop" => Self::Sighting,
            TAG_NOTE | "isNote" => Self::Note { text: note },
            TAG_PHOTO | "isImage" => Self::Photo { image_urls },
            other => {
                warn!("Unknown marker type: {}, defaulting to note", other);
                Self::Note { text: note }
            }
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single geotagged annotation.
///
/// The kind is fixed at construction; only the coordinate and the identity
/// (provisional to remote) can change, and both through copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    id: MarkerId,
    coordinate: Coordinate,
    kind: MarkerKind,
}

impl Marker {
    /// A new, not yet persisted marker.
    #[must_use]
    pub fn provisional(coordinate: Coordinate, kind: MarkerKind) -> Self {
        Self {
            id: MarkerId::provisional(),
            coordinate,
            kind,
        }
    }

    /// A marker backed by the store document `remote_id`.
    #[must_use]
    pub fn persisted(remote_id: RemoteId, coordinate: Coordinate, kind: MarkerKind) -> Self {
        Self {
            id: MarkerId::Remote(remote_id),
            coordinate,
            kind,
        }
    }

    /// The marker's identity.
    #[must_use]
    pub fn id(&self) -> &MarkerId {
        &self.id
    }

    /// The store id, if persisted.
    #[must_use]
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.id.remote()
    }

    /// Where the marker is.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// What the marker annotates.
    #[must_use]
    pub fn kind(&self) -> &MarkerKind {
        &self.kind
    }

    /// Note text for note markers.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        match &self.kind {
            MarkerKind::Note { text } => text.as_deref(),
            _ => None,
        }
    }

    /// Image URLs; empty unless this is a photo marker.
    #[must_use]
    pub fn image_urls(&self) -> &[String] {
        match &self.kind {
            MarkerKind::Photo { image_urls } => image_urls,
            _ => &[],
        }
    }

    /// The same marker at another coordinate.
    #[must_use]
    pub fn relocated(&self, coordinate: Coordinate) -> Self {
        Self {
            id: self.id.clone(),
            coordinate,
            kind: self.kind.clone(),
        }
    }

    /// The same marker, now identified by its store id.
    #[must_use]
    pub fn confirmed(self, remote_id: RemoteId) -> Self {
        Self {
            id: MarkerId::Remote(remote_id),
            ..self
        }
    }
}

/// The document shape stored for each marker.
///
/// No client identifier is stored; the document's own id is the marker's
/// [`RemoteId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDocument {
    /// Wire tag of the marker kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Note text, only for notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Image URLs, only for photos.
    #[serde(rename = "imageUrls", default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl MarkerDocument {
    /// The document to store for `marker`.
    #[must_use]
    pub fn from_marker(marker: &Marker) -> Self {
        let coordinate = marker.coordinate();
        Self {
            kind: marker.kind().tag().to_string(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            note: marker.note().map(str::to_string),
            image_urls: marker.image_urls().to_vec(),
        }
    }

    /// Serialize to a JSON value for the document store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a stored document into a persisted marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRecord`] when a required field is missing or
    /// mistyped, or when the stored coordinate is out of range.
    pub fn decode(doc_id: &str, data: &serde_json::Value) -> Result<Marker> {
        let doc: Self = serde_json::from_value(data.clone())
            .map_err(|e| Error::malformed(doc_id, e.to_string()))?;

        let coordinate = Coordinate::new(doc.latitude, doc.longitude);
        if !coordinate.is_valid() {
            return Err(Error::malformed(
                doc_id,
                format!("coordinate out of range: {coordinate}"),
            ));
        }

        let kind = MarkerKind::from_tag(&doc.kind, doc.note, doc.image_urls);
        Ok(Marker::persisted(RemoteId::new(doc_id), coordinate, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(0.0, 0.0).is_valid());
        assert!(Coordinate::new(90.0, 180.0).is_valid());
        assert!(Coordinate::new(-90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.000_001, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_same_position_is_exact() {
        let a = Coordinate::new(48.1, 11.5);
        assert!(a.same_position(&Coordinate::new(48.1, 11.5)));
        assert!(!a.same_position(&Coordinate::new(48.100_000_1, 11.5)));
    }

    #[test]
    fn test_owner_paths() {
        let owner = OwnerId::new("u1");
        assert_eq!(owner.markers_collection(), "users/u1/markers");
    }

    #[test]
    fn test_kind_tags_and_legacy_aliases() {
        assert_eq!(MarkerKind::from_tag("isCop", None, vec![]), MarkerKind::Sighting);
        assert_eq!(
            MarkerKind::from_tag("isNote", Some("hi".into()), vec![]),
            MarkerKind::Note {
                text: Some("hi".into())
            }
        );
        assert_eq!(
            MarkerKind::from_tag("photo", None, vec!["u".into()]),
            MarkerKind::Photo {
                image_urls: vec!["u".into()]
            }
        );
    }

    #[test]
    fn test_unknown_kind_degrades_to_note() {
        let kind = MarkerKind::from_tag("isUfo", None, vec!["ignored".into()]);
        assert_eq!(kind, MarkerKind::Note { text: None });
    }

    #[test]
    fn test_payload_only_on_matching_kind() {
        let kind = MarkerKind::from_tag("sighting", Some("note".into()), vec!["url".into()]);
        let marker = Marker::provisional(Coordinate::new(1.0, 1.0), kind);
        assert!(marker.note().is_none());
        assert!(marker.image_urls().is_empty());
    }

    #[test]
    fn test_same_kind_ignores_payload() {
        let a = MarkerKind::Note {
            text: Some("a".into()),
        };
        let b = MarkerKind::Note { text: None };
        assert!(a.same_kind(&b));
        assert!(!a.same_kind(&MarkerKind::Sighting));
    }

    #[test]
    fn test_confirmed_keeps_kind_and_coordinate() {
        let marker = Marker::provisional(Coordinate::new(3.0, 4.0), MarkerKind::Sighting);
        assert!(marker.remote_id().is_none());

        let confirmed = marker.clone().confirmed(RemoteId::new("doc-9"));
        assert_eq!(confirmed.remote_id(), Some(&RemoteId::new("doc-9")));
        assert_eq!(confirmed.coordinate(), marker.coordinate());
        assert_eq!(confirmed.kind(), marker.kind());
    }

    #[test]
    fn test_relocated_keeps_identity() {
        let marker = Marker::persisted(
            RemoteId::new("d"),
            Coordinate::new(1.0, 1.0),
            MarkerKind::Sighting,
        );
        let moved = marker.relocated(Coordinate::new(2.0, 2.0));
        assert_eq!(moved.id(), marker.id());
        assert_eq!(moved.coordinate(), Coordinate::new(2.0, 2.0));
    }

    #[test]
    fn test_document_shape() {
        let marker = Marker::provisional(
            Coordinate::new(10.0, 20.0),
            MarkerKind::Note {
                text: Some("speed trap".into()),
            },
        );
        let value = MarkerDocument::from_marker(&marker).to_value().unwrap();
        assert_eq!(
            value,
            json!({"type": "note", "latitude": 10.0, "longitude": 20.0, "note": "speed trap"})
        );
    }

    #[test]
    fn test_photo_document_uses_camel_case_urls() {
        let marker = Marker::provisional(
            Coordinate::new(0.0, 0.0),
            MarkerKind::Photo {
                image_urls: vec!["file:///a.jpg".into()],
            },
        );
        let value = MarkerDocument::from_marker(&marker).to_value().unwrap();
        assert_eq!(value["imageUrls"], json!(["file:///a.jpg"]));
        assert!(value.get("note").is_none());
    }

    #[test]
    fn test_decode_well_formed() {
        let marker = MarkerDocument::decode(
            "abc",
            &json!({"type": "isImage", "latitude": 1.0, "longitude": 2.0, "imageUrls": ["x"]}),
        )
        .unwrap();
        assert_eq!(marker.remote_id(), Some(&RemoteId::new("abc")));
        assert_eq!(marker.image_urls(), &["x".to_string()]);
    }

    #[test]
    fn test_decode_missing_latitude_is_malformed() {
        let err = MarkerDocument::decode("bad", &json!({"type": "note", "longitude": 2.0}))
            .unwrap_err();
        assert!(err.is_malformed_record());
        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn test_decode_out_of_range_is_malformed() {
        let err = MarkerDocument::decode(
            "far",
            &json!({"type": "sighting", "latitude": 123.0, "longitude": 2.0}),
        )
        .unwrap_err();
        assert!(err.is_malformed_record());
    }

    #[test]
    fn test_marker_id_display() {
        assert_eq!(MarkerId::Remote(RemoteId::new("r1")).to_string(), "r1");
        assert!(MarkerId::provisional()
            .to_string()
            .starts_with("provisional:"));
    }
}
