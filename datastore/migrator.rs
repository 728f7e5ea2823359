use automigrate_snapshot::schema::Schema;
use sqlx::any::AnyConnection;
use std::sync::Arc;
use crate::bootstrap;
use crate::conn::DataConn;
use crate::error::{ErrorKind, MigrationError, Result, ResultExt};
use crate::history::{self, HISTORY_TABLE, Revision};
use crate::migrate::{ChangeOp, Command, Services};

#[derive(Debug, Clone)]
pub struct MigratorOpts {
    pub max_connections: u32,
    /// Create the database if it does not exist.
    pub create_database: bool,
}

impl Default for MigratorOpts {
    fn default() -> Self {
        Self { max_connections: 4, create_database: true }
    }
}

/// What [`Migrator::run_migration`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The database does not support structural migrations, nothing was done.
    NotSupported,
    /// The database already matched the model stored in `revision`.
    UpToDate { revision: Option<Revision> },
    /// The model was stored as `revision` and `commands` were executed.
    Applied { revision: Revision, commands: Vec<Command> },
}

/// Migration that would be executed by [`Migrator::run_migration`].
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub ops: Vec<ChangeOp>,
    pub commands: Vec<Command>,
}

/// Brings the database schema in line with the model of the application.
pub struct Migrator {
    conn: DataConn,
    services: Services,
    initial_schema: Arc<Schema>,
}

impl Migrator {
    /// Connects to the database at `uri` with the default services for its kind.
    pub async fn connect(uri: &str, opts: &MigratorOpts) -> anyhow::Result<Self> {
        if opts.create_database {
            bootstrap::ensure_database(uri).await?;
        }
        let conn = DataConn::connect(uri, opts.max_connections).await?;
        let services = Services::for_kind(conn.kind());
        Self::with_services(conn, services).await
    }

    pub async fn with_services(conn: DataConn, services: Services) -> anyhow::Result<Self> {
        let initial_schema = bootstrap::bootstrap(&conn).await?;
        Ok(Self { conn, services, initial_schema })
    }

    pub fn conn(&self) -> &DataConn {
        &self.conn
    }

    /// Migrates the database to `live_schema` and records it in the history.
    ///
    /// The model is recorded before the commands are executed. If the commands fail, the record
    /// is removed again, so the latest record always describes the schema of the database.
    pub async fn run_migration(&self, live_schema: &Schema) -> Result<Outcome> {
        if !self.services.executor.is_relational() {
            info!("Database does not support schema migrations, skipping");
            return Ok(Outcome::NotSupported);
        }
        check_model(live_schema)?;

        let mut db_conn = self.conn.acquire().await.err_storage()?;
        let (revision, plan) = match self.plan_with(&mut db_conn, live_schema).await? {
            (revision, None) => {
                match revision {
                    Some(revision) => info!("Database schema is up to date at revision {}", revision),
                    None => info!("Database schema is up to date"),
                }
                return Ok(Outcome::UpToDate { revision })
            },
            (revision, Some(plan)) => (revision, plan),
        };
        debug!("Migrating from revision {:?} with {} operations", revision.map(|r| r.0), plan.ops.len());

        let model = self.services.codec.serialize(live_schema)
            .err_compilation()?;
        let revision = history::append(&mut db_conn, &model).await
            .err_storage()?;
        info!("Recorded model as revision {}, executing {} commands", revision, plan.commands.len());

        match self.services.executor.execute(&mut db_conn, &plan.commands).await {
            Ok(()) => {
                info!("Database schema migrated to revision {}", revision);
                Ok(Outcome::Applied { revision, commands: plan.commands })
            },
            Err(exec_err) => {
                warn!("Migration to revision {} failed, removing its history record: {:#}", revision, exec_err);
                match history::remove(&mut db_conn, revision).await {
                    Ok(()) => Err(MigrationError::new(ErrorKind::Execution, exec_err)),
                    Err(remove_err) => {
                        let inner = remove_err.context(format!(
                            "could not remove history record {} after failed migration: {:#}",
                            revision, exec_err));
                        Err(MigrationError::new(ErrorKind::Compensation, inner))
                    },
                }
            },
        }
    }

    /// Computes the migration to `live_schema` without executing it. Returns `None` if the
    /// database is up to date or does not support migrations.
    pub async fn plan(&self, live_schema: &Schema) -> Result<Option<Plan>> {
        if !self.services.executor.is_relational() {
            return Ok(None);
        }
        check_model(live_schema)?;
        let mut db_conn = self.conn.acquire().await.err_storage()?;
        let (_, plan) = self.plan_with(&mut db_conn, live_schema).await?;
        Ok(plan)
    }

    /// Revisions of all records in the history, oldest first.
    pub async fn history(&self) -> Result<Vec<Revision>> {
        let mut db_conn = self.conn.acquire().await.err_storage()?;
        let records = history::list(&mut db_conn).await.err_storage()?;
        Ok(records.into_iter().map(|record| record.revision).collect())
    }

    /// Reads the last applied model and plans the migration from it to `live_schema`.
    async fn plan_with(
        &self,
        db_conn: &mut AnyConnection,
        live_schema: &Schema,
    ) -> Result<(Option<Revision>, Option<Plan>)> {
        let (revision, last_schema) = match history::latest(db_conn).await.err_storage()? {
            Some(record) => {
                let schema = self.services.codec.deserialize(&record.model)
                    .map_err(|e| e.context(format!("could not read model of revision {}", record.revision)))
                    .err_compilation()?;
                (Some(record.revision), Arc::new(schema))
            },
            None => (None, self.initial_schema.clone()),
        };

        let ops = self.services.differ.diff(&last_schema, live_schema)
            .err_planning()?;
        if ops.is_empty() {
            return Ok((revision, None));
        }
        let commands = self.services.generator.generate(&ops, live_schema)
            .err_planning()?;
        Ok((revision, Some(Plan { ops, commands })))
    }
}

fn check_model(live_schema: &Schema) -> Result<()> {
    live_schema.validate().err_planning()?;
    if live_schema.entities.contains_key(HISTORY_TABLE) {
        return Err(MigrationError::new(ErrorKind::Planning,
            anyhow::anyhow!("entity name {:?} is reserved for the migration history", HISTORY_TABLE)));
    }
    Ok(())
}
