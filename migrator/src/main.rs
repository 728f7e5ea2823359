// SPDX-FileCopyrightText: © 2022 ChiselStrike <info@chiselstrike.com>

#[macro_use]
extern crate log;

mod model;
mod opt;

use anyhow::{Result, Context};
use automigrate_datastore::conn::DataConn;
use automigrate_datastore::migrate::Services;
use automigrate_datastore::{bootstrap, Migrator, MigratorOpts, Outcome};
use automigrate_snapshot::artifact::{ArtifactCodec, FileCompiler, FileModuleLoader};
use std::sync::Arc;
use structopt::StructOpt;
use crate::opt::Opt;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut opt = Opt::from_args();
    if let Some(config) = opt.config.clone() {
        opt = Opt::from_file(&config).await
            .with_context(|| format!("could not read config file {}", config.display()))?;
    }

    if opt.show_config {
        println!("{}", serde_json::to_string_pretty(&opt)?);
        return Ok(());
    }

    let model_path = opt.model.as_ref()
        .context("no model file given, use --model")?;
    let model = model::read_model(model_path).await?;
    let migrator = connect(&opt).await?;

    if opt.dry_run {
        match migrator.plan(&model).await? {
            Some(plan) => for command in plan.commands.iter() {
                println!("{};", command);
            },
            None => info!("Nothing to migrate"),
        }
        return Ok(());
    }

    match migrator.run_migration(&model).await? {
        Outcome::NotSupported => {},
        Outcome::UpToDate { .. } => {},
        Outcome::Applied { revision, commands } =>
            debug!("Revision {} applied with {} commands", revision, commands.len()),
    }
    Ok(())
}

async fn connect(opt: &Opt) -> Result<Migrator> {
    let migrator_opts = MigratorOpts { max_connections: opt.nr_connections, ..MigratorOpts::default() };
    let artifact_dir = match &opt.artifact_dir {
        Some(artifact_dir) => artifact_dir,
        None => return Migrator::connect(&opt.db_uri, &migrator_opts).await,
    };

    bootstrap::ensure_database(&opt.db_uri).await?;
    let conn = DataConn::connect(&opt.db_uri, migrator_opts.max_connections).await?;
    let codec = ArtifactCodec::new(artifact_dir, FileCompiler, FileModuleLoader);
    let services = Services::for_kind(conn.kind()).with_codec(Arc::new(codec));
    Migrator::with_services(conn, services).await
}
