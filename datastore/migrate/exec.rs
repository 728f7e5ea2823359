use anyhow::{Result, Context};
use async_trait::async_trait;
use sqlx::any::AnyConnection;
use sqlx::{Connection, Executor};
use super::CommandExecutor;
use super::gen::Command;

/// Executes commands on a relational database, all of them in one transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlCommandExecutor;

#[async_trait]
impl CommandExecutor for SqlCommandExecutor {
    async fn execute(&self, conn: &mut AnyConnection, commands: &[Command]) -> Result<()> {
        let mut txn = conn.begin().await
            .context("could not begin a transaction")?;
        for command in commands.iter() {
            debug!("Executing {}", command);
            execute_sql(&mut txn, &command.sql).await?;
        }
        // the transaction is rolled back if it is dropped before this point
        txn.commit().await
            .context("could not commit migration commands")
    }
}

async fn execute_sql(
    txn: &mut sqlx::Transaction<'_, sqlx::Any>,
    sql_text: &str,
) -> Result<()> {
    txn.execute(sql_text).await
        .with_context(|| {
            if cfg!(debug_assertions) {
                format!("could not execute SQL statement {:?}", sql_text)
            } else {
                "could not execute SQL statement".into()
            }
        })?;
    Ok(())
}
