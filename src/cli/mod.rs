//! CLI entry point for payguard.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Payguard CLI
#[derive(Parser, Debug)]
#[command(name = "payguard", version, about = "Probe payment API endpoints through the resilience pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the standard pipeline
    Probe(ProbeArgs),
}

/// Arguments for `payguard probe`.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Target URL
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Extra header, `name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// TOML config file (defaults plus PAYGUARD_* env otherwise)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the catch-all handler's retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,
}

/// Split a `name: value` header argument.
pub fn parse_header(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name, value.trim()))
}
