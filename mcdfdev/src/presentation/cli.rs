use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "mcdfdev CLI (alpha)", long_about = None)]
pub struct Cli {
    /// Settings file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum RegistryCommands {
    /// List registered targets
    List {
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Register an archive for a character
    Add {
        name: String,
        home_zone: String,
        archive: PathBuf,
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Remove a registration
    Remove {
        name: String,
        home_zone: String,
        #[arg(long)]
        registry: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show header, metadata and blob table
    Inspect { archive: PathBuf },

    /// Extract blobs and print the logical path mapping
    Extract { archive: PathBuf, dest: PathBuf },

    /// Build an archive from local files
    Pack {
        out: PathBuf,

        /// File holding the appearance state
        #[arg(long)]
        appearance: PathBuf,

        /// File holding the shape profile state
        #[arg(long)]
        shape: Option<PathBuf>,

        /// File holding the override metadata
        #[arg(long)]
        overrides: Option<PathBuf>,

        #[arg(long, default_value = "")]
        description: String,

        /// zstd level; the configured level when omitted
        #[arg(long)]
        level: Option<i32>,

        /// Assets as logical=local pairs
        files: Vec<String>,
    },

    #[command(subcommand)]
    /// Manage the target registry
    Registry(RegistryCommands),
}
