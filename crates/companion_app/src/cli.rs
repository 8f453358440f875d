//! Command-line surface of the `companion` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// StudyCompanion client: cached page state and tracked study tasks.
#[derive(Debug, Parser)]
#[command(name = "companion", version)]
pub struct Cli {
    /// Directory holding persisted state, the session token and the log
    #[arg(long, global = true, default_value = ".companion")]
    pub data_dir: PathBuf,

    /// Configuration file (defaults to companion.ron in the data directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read or change cached page state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Store the session token used for assistant requests
    Login { token: String },

    /// Clear all cached state and forget the session token
    Logout,

    /// Upload a document (.pdf, .docx, .doc)
    Upload {
        file: PathBuf,

        /// Unit the document belongs to
        #[arg(long)]
        unit: Option<u64>,

        /// Page the task is tracked under
        #[arg(long, default_value = "documents")]
        page: String,
    },

    /// Ask the study assistant
    Chat {
        message: String,

        #[arg(long, default_value = "cli")]
        session: String,

        #[arg(long, default_value = "ai-chat")]
        page: String,
    },

    /// Request a summary of an uploaded document
    Summarize {
        document_id: u64,

        #[arg(long, default_value = "documents")]
        page: String,
    },

    /// Download a document into a local directory
    Download {
        /// Server path or absolute URL
        remote_path: String,

        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Local file name (defaults to the last path segment)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "documents")]
        page: String,
    },

    /// Check whether the AI backend is ready
    Health,
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// Print the cached entry for a page
    Get { page: String },

    /// Replace the cached entry for a page with a JSON value
    Set { page: String, json: String },

    /// Remove one page's entry, or everything with --all
    Clear {
        #[arg(required_unless_present = "all")]
        page: Option<String>,

        #[arg(long, conflicts_with = "page")]
        all: bool,
    },
}
