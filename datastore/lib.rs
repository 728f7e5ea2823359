#[macro_use]
extern crate log;

pub mod bootstrap;
pub mod conn;
pub mod error;
pub mod history;
pub mod migrate;
pub mod migrator;
mod sql_writer;

pub use self::error::{ErrorKind, MigrationError};
pub use self::migrator::{Migrator, MigratorOpts, Outcome, Plan};
