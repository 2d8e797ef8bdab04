//! CLI module - Command-line interface for Pinegate
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// Pinegate - Pine Script access manager
/// Sells and grants TradingView invite-only script access through access keys
#[derive(Parser)]
#[command(name = "pinegate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web API server
    #[command(alias = "daemon", alias = "web")]
    Serve,

    /// Manage access keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage the Pine Script catalog
    Scripts {
        #[command(subcommand)]
        command: ScriptCommands,
    },

    /// Talk to TradingView directly
    Tv {
        #[command(subcommand)]
        command: TvCommands,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate new access keys
    #[command(alias = "gen")]
    Generate {
        /// Number of keys to generate
        #[arg(short, long, default_value = "1")]
        count: usize,
    },
    /// List all access keys
    #[command(alias = "ls")]
    List,
    /// Show key counts by status
    Stats,
}

#[derive(Subcommand)]
pub enum ScriptCommands {
    /// Add a script to the catalog
    Add {
        /// Pine Script id, e.g. PUB;abc123
        pine_id: String,
        /// Display name
        name: String,
        /// Optional description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List catalog scripts
    #[command(alias = "ls")]
    List,
    /// Remove a script from the catalog
    #[command(alias = "rm")]
    Remove {
        /// Pine Script id
        pine_id: String,
    },
}

#[derive(Subcommand)]
pub enum TvCommands {
    /// Check that a TradingView username exists
    Validate {
        /// TradingView username
        username: String,
    },
    /// List the users holding access to a script
    Holders {
        /// Pine Script id
        pine_id: String,
    },
}

pub use commands::*;
