//! The table that records every model that was applied to the database.
//!
//! Each row holds the serialized model together with its revision. The revision is assigned by
//! the database when the row is inserted, so revisions grow with every applied migration.

use anyhow::{Result, Context, ensure};
use sea_query::Iden;
use sqlx::any::AnyConnection;
use sqlx::{Connection, Row};
use std::fmt;
use crate::conn::schema_builder;

/// Name of the history table. User models must not define an entity with this name.
pub const HISTORY_TABLE: &str = "migration_history";

#[derive(Iden)]
pub enum MigrationHistory {
    Table,
    Revision,
    Model,
}

/// Revision of a row in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub i32);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub revision: Revision,
    /// The model in the serialized form produced by a snapshot codec.
    pub model: String,
}

/// Creates the history table unless it already exists.
pub async fn ensure_table(conn: &mut AnyConnection) -> Result<()> {
    let stmt = sea_query::Table::create()
        .table(MigrationHistory::Table)
        .if_not_exists()
        .col(
            sea_query::ColumnDef::new(MigrationHistory::Revision)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            sea_query::ColumnDef::new(MigrationHistory::Model)
                .text()
                .not_null(),
        )
        .build_any(schema_builder(conn.kind()));
    sqlx::query(&stmt).execute(conn).await
        .context("could not create the history table")?;
    Ok(())
}

/// Reads the record with the highest revision, if the table is not empty.
pub async fn latest(conn: &mut AnyConnection) -> Result<Option<HistoryRecord>> {
    let row = sqlx::query("SELECT revision, model FROM migration_history ORDER BY revision DESC LIMIT 1")
        .fetch_optional(conn).await
        .context("could not read the latest history record")?;
    row.map(|row| decode_record(&row)).transpose()
}

/// Stores `model` as a new record and returns the revision assigned to it.
pub async fn append(conn: &mut AnyConnection, model: &str) -> Result<Revision> {
    let mut txn = conn.begin().await?;
    let row = sqlx::query("INSERT INTO migration_history (model) VALUES ($1) RETURNING revision")
        .bind(model.to_owned())
        .fetch_one(&mut txn).await
        .context("could not insert a history record")?;
    let revision = Revision(row.try_get("revision")?);
    txn.commit().await
        .context("could not commit the history record")?;
    Ok(revision)
}

/// Removes the record with given revision. Fails if there is no such record.
pub async fn remove(conn: &mut AnyConnection, revision: Revision) -> Result<()> {
    let mut txn = conn.begin().await?;
    let result = sqlx::query("DELETE FROM migration_history WHERE revision = $1")
        .bind(revision.0)
        .execute(&mut txn).await
        .with_context(|| format!("could not delete history record {}", revision))?;
    ensure!(result.rows_affected() == 1, "history record {} does not exist", revision);
    txn.commit().await
        .with_context(|| format!("could not commit removal of history record {}", revision))?;
    Ok(())
}

pub async fn count(conn: &mut AnyConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM migration_history")
        .fetch_one(conn).await
        .context("could not count history records")?;
    Ok(row.try_get("cnt")?)
}

/// Reads all records, oldest first.
pub async fn list(conn: &mut AnyConnection) -> Result<Vec<HistoryRecord>> {
    let rows = sqlx::query("SELECT revision, model FROM migration_history ORDER BY revision")
        .fetch_all(conn).await
        .context("could not read history records")?;
    rows.iter().map(decode_record).collect()
}

fn decode_record(row: &sqlx::any::AnyRow) -> Result<HistoryRecord> {
    let revision = row.try_get("revision").context("could not decode revision")?;
    let model = row.try_get("model").context("could not decode model")?;
    Ok(HistoryRecord { revision: Revision(revision), model })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name() {
        assert_eq!(MigrationHistory::Table.to_string(), HISTORY_TABLE);
        assert_eq!(MigrationHistory::Revision.to_string(), "revision");
        assert_eq!(MigrationHistory::Model.to_string(), "model");
    }
}
