//! Migration of the database schema from one model to another.
//!
//! A migration goes through three stages, each behind a trait so that it can be replaced:
//! [`ModelDiffer`] computes the [`ChangeOp`]s between two models, [`CommandGenerator`] turns them
//! into [`Command`]s and [`CommandExecutor`] applies the commands to the database.

use anyhow::Result;
use async_trait::async_trait;
use automigrate_snapshot::{JsonCodec, SnapshotCodec};
use automigrate_snapshot::schema::Schema;
use sqlx::any::{AnyConnection, AnyKind};
use std::sync::Arc;

mod exec;
mod gen;
mod plan;
mod repr;

pub use self::exec::SqlCommandExecutor;
pub use self::gen::{Command, generate_commands};
pub use self::plan::{ChangeOp, diff};
pub use self::plan::{
    AddColumn, AddForeignKey, AlterColumn, CreateIndex, CreateTable, DropColumn, DropForeignKey,
    DropIndex, DropTable,
};

pub trait ModelDiffer: Send + Sync {
    /// Computes the ordered operations that turn `old_schema` into `new_schema`.
    fn diff(&self, old_schema: &Schema, new_schema: &Schema) -> Result<Vec<ChangeOp>>;
}

pub trait CommandGenerator: Send + Sync {
    /// Translates `ops` into commands. `target` is the schema that the operations lead to.
    fn generate(&self, ops: &[ChangeOp], target: &Schema) -> Result<Vec<Command>>;
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Whether the executor works with a relational database. Migrations are skipped for
    /// executors that don't.
    fn is_relational(&self) -> bool {
        true
    }

    /// Executes all `commands` or none of them.
    async fn execute(&self, conn: &mut AnyConnection, commands: &[Command]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaDiffer;

impl ModelDiffer for SchemaDiffer {
    fn diff(&self, old_schema: &Schema, new_schema: &Schema) -> Result<Vec<ChangeOp>> {
        plan::diff(old_schema, new_schema)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqlCommandGenerator {
    kind: AnyKind,
}

impl SqlCommandGenerator {
    pub fn new(kind: AnyKind) -> Self {
        Self { kind }
    }
}

impl CommandGenerator for SqlCommandGenerator {
    fn generate(&self, ops: &[ChangeOp], target: &Schema) -> Result<Vec<Command>> {
        gen::generate_commands(self.kind, ops, target)
    }
}

/// The collaborators used by a migration.
#[derive(Clone)]
pub struct Services {
    pub differ: Arc<dyn ModelDiffer>,
    pub generator: Arc<dyn CommandGenerator>,
    pub executor: Arc<dyn CommandExecutor>,
    pub codec: Arc<dyn SnapshotCodec>,
}

impl Services {
    /// The default services for a database of given kind.
    pub fn for_kind(kind: AnyKind) -> Self {
        Self {
            differ: Arc::new(SchemaDiffer),
            generator: Arc::new(SqlCommandGenerator::new(kind)),
            executor: Arc::new(SqlCommandExecutor),
            codec: Arc::new(JsonCodec::pretty()),
        }
    }

    pub fn with_codec(self, codec: Arc<dyn SnapshotCodec>) -> Self {
        Self { codec, ..self }
    }

    pub fn with_executor(self, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor, ..self }
    }
}
