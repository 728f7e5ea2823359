use anyhow::{Result, Context};
use sea_query::{PostgresQueryBuilder, SchemaBuilder, SqliteQueryBuilder};
use sqlx::any::{AnyKind, AnyPool, AnyPoolOptions};
use sqlx::pool::PoolConnection;

/// Database connection.
#[derive(Debug, Clone)]
pub struct DataConn {
    pub pool: AnyPool,
}

impl DataConn {
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await
            .with_context(|| format!("failed to connect to {}", uri))?;
        Ok(Self { pool })
    }

    pub fn kind(&self) -> AnyKind {
        self.pool.any_kind()
    }

    /// Takes a connection out of the pool. It goes back to the pool when dropped.
    pub async fn acquire(&self) -> Result<PoolConnection<sqlx::Any>> {
        self.pool.acquire().await.context("could not acquire a database connection")
    }
}

pub fn schema_builder(kind: AnyKind) -> &'static dyn SchemaBuilder {
    match kind {
        AnyKind::Postgres => &PostgresQueryBuilder,
        AnyKind::Sqlite => &SqliteQueryBuilder,
    }
}
