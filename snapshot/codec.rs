use anyhow::{Result, Context};
use serde::{Serialize, Deserialize};
use std::borrow::Cow;
use crate::schema::Schema;

/// Tag that identifies snapshot text produced by this crate.
pub const SNAPSHOT_FORMAT: &str = "automigrate-snapshot";

/// Current version of the snapshot envelope. Snapshots with a newer version are rejected.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Converts a [`Schema`] to its stored text form and back.
pub trait SnapshotCodec: Send + Sync {
    fn serialize(&self, schema: &Schema) -> Result<String>;
    fn deserialize(&self, text: &str) -> Result<Schema>;
}

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error["snapshot is not valid JSON"]]
    Malformed(#[source] serde_json::Error),
    #[error["unknown snapshot format {0:?}"]]
    UnknownFormat(String),
    #[error["snapshot version {0} is newer than supported version {}", SNAPSHOT_VERSION]]
    TooNew(u32),
    #[error["snapshot contains an invalid schema"]]
    InvalidSchema(#[source] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<'a> {
    format: Cow<'a, str>,
    version: u32,
    /// Unique name of the snapshot. Only used to name artifacts, never compared.
    #[serde(default)]
    id: Cow<'a, str>,
    schema: serde_json::Value,
}

/// Stores snapshots as a tagged, versioned JSON document.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits indented JSON, which is easier to read in the history table.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl SnapshotCodec for JsonCodec {
    fn serialize(&self, schema: &Schema) -> Result<String> {
        let schema = serde_json::to_value(schema)
            .context("could not encode schema")?;
        let id = snapshot_id();
        let envelope = Envelope {
            format: SNAPSHOT_FORMAT.into(),
            version: SNAPSHOT_VERSION,
            id: id.into(),
            schema,
        };
        let text = if self.pretty {
            serde_json::to_string_pretty(&envelope)
        } else {
            serde_json::to_string(&envelope)
        };
        text.context("could not encode snapshot")
    }

    fn deserialize(&self, text: &str) -> Result<Schema> {
        Ok(decode(text)?)
    }
}

/// Decodes snapshot text into a schema.
pub fn decode(text: &str) -> Result<Schema, SnapshotError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(SnapshotError::Malformed)?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(SnapshotError::UnknownFormat(envelope.format.into_owned()));
    }
    if envelope.version > SNAPSHOT_VERSION {
        return Err(SnapshotError::TooNew(envelope.version));
    }
    serde_json::from_value(envelope.schema)
        .map_err(SnapshotError::InvalidSchema)
}

/// Generates a new identifier from a high-resolution UTC timestamp, so that two snapshots taken
/// by the same process never share a name.
pub fn snapshot_id() -> String {
    use std::sync::Mutex;
    static LAST: Mutex<i128> = Mutex::new(0);

    let now = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    let mut last = LAST.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *last = now.max(*last + 1);
    format!("Snapshot{}", *last)
}
