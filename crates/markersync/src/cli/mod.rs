//! Command-line interface for markersync.
//!
//! This module provides the CLI structure for the `mksync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DeleteCommand, KindArg, ListCommand, MoveCommand, NearbyCommand, PlaceCommand,
    ReconcileCommand, RegisterCommand, StatusCommand, WipeCommand,
};

use crate::logging::Verbosity;

/// mksync - Keep your map markers in sync
///
/// Places, lists and removes geotagged markers (sightings, notes, photos)
/// in a local document store, and watches it for markers added by other
/// sessions.
#[derive(Debug, Parser)]
#[command(name = "mksync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Act as this owner instead of the configured one
    #[arg(short, long, global = true, value_name = "ID")]
    pub owner: Option<String>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Place a marker
    Place(PlaceCommand),

    /// List the owner's markers
    List(ListCommand),

    /// Show notes and photos near a coordinate
    Nearby(NearbyCommand),

    /// Move a marker
    Move(MoveCommand),

    /// Delete a marker
    Delete(DeleteCommand),

    /// Delete all of the owner's markers
    Wipe(WipeCommand),

    /// Snap drifted markers back to their saved location
    Reconcile(ReconcileCommand),

    /// Print markers as they are added until interrupted
    Watch,

    /// Create the owner's profile
    Register(RegisterCommand),

    /// Show store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
