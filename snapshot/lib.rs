#[macro_use]
extern crate log;

pub mod artifact;
pub mod codec;
pub mod schema;
pub mod serde_with;

pub use self::codec::{JsonCodec, SnapshotCodec, SnapshotError};
