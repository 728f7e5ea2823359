use anyhow::{Result, Context};
use automigrate_snapshot::schema::Schema;
use sqlx::migrate::MigrateDatabase;
use std::sync::Arc;
use crate::conn::DataConn;
use crate::history;

/// Creates the database at `uri` if it does not exist yet.
pub async fn ensure_database(uri: &str) -> Result<()> {
    let exists = sqlx::Any::database_exists(uri).await
        .with_context(|| format!("could not check whether database {} exists", uri))?;
    if !exists {
        info!("Creating database {}", uri);
        sqlx::Any::create_database(uri).await
            .with_context(|| format!("could not create database {}", uri))?;
    }
    Ok(())
}

/// Prepares the database for migrations and returns the model that an empty database has.
pub async fn bootstrap(conn: &DataConn) -> Result<Arc<Schema>> {
    let mut db_conn = conn.acquire().await?;
    history::ensure_table(&mut db_conn).await
        .context("could not bootstrap the migration history")?;
    Ok(Arc::new(Schema::new()))
}
