//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::marker::{Coordinate, MarkerKind};

/// Place command arguments.
#[derive(Debug, Args)]
pub struct PlaceCommand {
    /// Latitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,

    /// Kind of marker to place
    #[arg(short, long, value_enum, default_value = "sighting")]
    pub kind: KindArg,

    /// Note text (note markers only)
    #[arg(short, long)]
    pub note: Option<String>,

    /// Image file to upload (photo markers only, repeatable)
    #[arg(short, long = "image", value_name = "FILE")]
    pub images: Vec<PathBuf>,
}

impl PlaceCommand {
    /// The coordinate given on the command line.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Nearby command arguments.
#[derive(Debug, Args)]
pub struct NearbyCommand {
    /// Latitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,

    /// Maximum number of results (defaults to the configured limit)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Move command arguments.
#[derive(Debug, Args)]
pub struct MoveCommand {
    /// Store id of the marker
    pub id: String,

    /// New latitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// New longitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,
}

/// Delete command arguments.
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Store id of the marker
    pub id: String,
}

/// Wipe command arguments.
#[derive(Debug, Args)]
pub struct WipeCommand {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Reconcile command arguments.
#[derive(Debug, Args)]
pub struct ReconcileCommand {
    /// Device latitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Device longitude in degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,
}

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Email address for the owner profile
    pub email: String,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Marker kind argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Police sighting
    Sighting,
    /// Text note
    Note,
    /// Photo with uploaded images
    Photo,
}

impl KindArg {
    /// Build the marker kind, attaching note text to notes.
    ///
    /// Photo kinds are built after upload, so this returns `None` for them.
    #[must_use]
    pub fn to_kind(self, note: Option<String>) -> Option<MarkerKind> {
        match self {
            Self::Sighting => Some(MarkerKind::Sighting),
            Self::Note => Some(MarkerKind::Note { text: note }),
            Self::Photo => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_arg_conversion() {
        assert_eq!(KindArg::Sighting.to_kind(None), Some(MarkerKind::Sighting));
        assert_eq!(
            KindArg::Note.to_kind(Some("hi".into())),
            Some(MarkerKind::Note {
                text: Some("hi".into())
            })
        );
        assert_eq!(KindArg::Photo.to_kind(None), None);
    }

    #[test]
    fn test_place_command_coordinate() {
        let cmd = PlaceCommand {
            latitude: -1.5,
            longitude: 2.5,
            kind: KindArg::Sighting,
            note: None,
            images: Vec::new(),
        };
        assert_eq!(cmd.coordinate(), Coordinate::new(-1.5, 2.5));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_kind_arg_debug() {
        let arg = KindArg::Photo;
        let debug_str = format!("{arg:?}");
        assert_eq!(debug_str, "Photo");
    }
}
