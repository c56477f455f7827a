//! Command-line surface (SPEC_FULL §1.1): `serve`, `doctor`, `config
//! validate`, `config show`, `version`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "idg-gateway", about = "Identity gateway cache: replicator + SigV4 verifier")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the replicator and HTTP verification API.
    Serve {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Check connectivity to the store and directory server without serving.
    Doctor {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Config file inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the build version.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Parse the config file and report validation issues.
    Validate {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Print the effective config (with defaults filled in) as JSON.
    Show {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}
