//! # Command Line Interface

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::domain::{AdmissionStatus, ObjectSource};
use crate::graph::{self, BuildOptions};
use crate::sources::FileSource;
use crate::{Config, Result};

#[derive(Parser, Debug)]
#[command(name = "gateplane")]
#[command(about = "Envoy control plane for routing objects")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, env = "GATEPLANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Object manifest (YAML or JSON)
    #[arg(short, long, env = "GATEPLANE_MANIFEST", default_value = "objects.yaml")]
    pub manifest: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the control plane server (default)
    Serve,

    /// Build the manifest once and print every object's admission status
    Check,
}

/// Admission statuses for every routing object in `manifest`, keyed by
/// `kind/namespace/name`.
pub async fn check(
    config: &Config,
    manifest: &Path,
) -> Result<BTreeMap<String, AdmissionStatus>> {
    let snapshot = FileSource::new(manifest).snapshot().await?;
    let output = graph::build(&snapshot, &BuildOptions::from_config(config));
    Ok(output.statuses.into_iter().map(|(object, status)| (object.to_string(), status)).collect())
}
