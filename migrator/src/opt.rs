// SPDX-FileCopyrightText: © 2022 ChiselStrike <info@chiselstrike.com>

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use structopt_toml::StructOptToml;

#[derive(StructOpt, Debug, Clone, StructOptToml, Deserialize, Serialize)]
#[structopt(name = "automigrate")]
#[serde(deny_unknown_fields, default)]
pub struct Opt {
    /// Database URI.
    #[structopt(long, env = "AUTOMIGRATE_DB_URI", default_value = "sqlite://automigrate.db?mode=rwc")]
    pub db_uri: String,
    /// Model of the application, as a JSON or YAML file.
    #[structopt(short, long)]
    pub model: Option<PathBuf>,
    /// size of database connection pool.
    #[structopt(short, long, default_value = "4")]
    pub nr_connections: u32,
    /// If set, stored models are read back by compiling them into modules in this directory.
    #[structopt(long)]
    pub artifact_dir: Option<PathBuf>,
    /// Print the commands of the migration instead of executing them.
    #[structopt(long)]
    pub dry_run: bool,
    /// Read default configuration from this toml configuration file
    #[structopt(long, short)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
    /// Prints the configuration resulting from the merging of all the configuration sources,
    /// including default values, in the JSON format.
    #[structopt(long)]
    #[serde(skip)]
    pub show_config: bool,
}

impl Opt {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        let content = std::str::from_utf8(&content)?;

        Self::from_args_with_toml(content).map_err(|e| anyhow!(e.to_string()))
    }
}
