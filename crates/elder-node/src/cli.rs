use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

/// Elder - key lifecycle and quorum signing for Elder validators
#[derive(Parser)]
#[command(name = "elder")]
#[command(about = "Elder quorum node utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a sample configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Generate the first key for an Elder
    Keygen {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Elder id
        #[arg(long)]
        elder: String,
    },

    /// Rotate an Elder's active key
    Rotate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Elder id
        #[arg(long)]
        elder: String,
    },

    /// Revoke a key
    Revoke {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Key id (hex)
        #[arg(long)]
        key_id: String,

        /// Reason recorded with the revocation
        #[arg(long)]
        reason: String,

        /// Designated authority secret key (hex)
        #[arg(long)]
        authority_secret: Option<String>,

        /// Elders co-signing under an elder-quorum authority (comma-separated)
        #[arg(long, value_delimiter = ',')]
        cosigners: Vec<String>,
    },

    /// Sign a header as an Elder
    Sign {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Elder id
        #[arg(long)]
        elder: String,

        /// Header JSON file
        #[arg(long)]
        header: PathBuf,

        /// Output file for the signature (JSON); stdout if omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Verify a quorum signature against a registry snapshot
    Verify {
        /// Header JSON file
        #[arg(long)]
        header: PathBuf,

        /// Quorum signature JSON file
        #[arg(long)]
        quorum: PathBuf,

        /// Registry snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Pin and print the registry snapshot for a height
    Snapshot {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Block height
        #[arg(long)]
        height: u64,
    },

    /// List keys due for rotation
    RotationDue {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Mark keys past their expiry as expired
    ExpireDue {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Export the signed revocation list
    ExportRevocations {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Issuer secret key (hex)
        #[arg(long)]
        authority_secret: String,

        /// Elders endorsing the list under an elder-quorum authority (comma-separated)
        #[arg(long, value_delimiter = ',')]
        endorsers: Vec<String>,

        /// Output file (JSON); stdout if omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

impl Commands {
    /// Config file the command reads, if any
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Commands::Init { .. } | Commands::Verify { .. } => None,
            Commands::Keygen { config, .. }
            | Commands::Rotate { config, .. }
            | Commands::Revoke { config, .. }
            | Commands::Sign { config, .. }
            | Commands::Snapshot { config, .. }
            | Commands::RotationDue { config }
            | Commands::ExpireDue { config }
            | Commands::ExportRevocations { config, .. } => Some(config),
        }
    }
}
