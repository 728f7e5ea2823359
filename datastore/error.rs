use std::fmt;

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Failure of a migration, classified by the stage that failed.
#[derive(Debug)]
pub struct MigrationError {
    pub inner: anyhow::Error,
    pub kind: ErrorKind,
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = match self.kind {
            ErrorKind::Compilation => "snapshot error",
            ErrorKind::Planning => "planning error",
            ErrorKind::Storage => "history error",
            ErrorKind::Execution => "execution error",
            ErrorKind::Compensation => "compensation error",
        };

        write!(f, "{context}: {:#}", self.inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The model could not be serialized, or a stored model could not be read back.
    Compilation,
    /// The differ or the command generator refused the change.
    Planning,
    /// The history table could not be read or written.
    Storage,
    /// A command failed. The history record of the migration was removed again.
    Execution,
    /// A command failed and the history record could not be removed afterwards.
    Compensation,
}

impl std::error::Error for MigrationError {}

pub trait ResultExt<T> {
    fn err_compilation(self) -> Result<T>;
    fn err_planning(self) -> Result<T>;
    fn err_storage(self) -> Result<T>;
    fn err_execution(self) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn err_compilation(self) -> Result<T> {
        self.map_err(|e| MigrationError::new(ErrorKind::Compilation, e.into()))
    }

    fn err_planning(self) -> Result<T> {
        self.map_err(|e| MigrationError::new(ErrorKind::Planning, e.into()))
    }

    fn err_storage(self) -> Result<T> {
        self.map_err(|e| MigrationError::new(ErrorKind::Storage, e.into()))
    }

    fn err_execution(self) -> Result<T> {
        self.map_err(|e| MigrationError::new(ErrorKind::Execution, e.into()))
    }
}

impl MigrationError {
    pub fn new(kind: ErrorKind, inner: anyhow::Error) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}
