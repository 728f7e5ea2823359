//! Snapshot loading through compiled artifacts.
//!
//! Some deployments keep snapshots as source units that have to be compiled into a loadable module
//! before the schema can be read back. [`ArtifactCodec`] drives that process: it writes the
//! snapshot text into a transient file, hands it to a [`SnapshotCompiler`], loads the result with
//! a [`ModuleLoader`] and reads the schema from the single [`ModelSnapshot`] found in the module.
//!
//! The compiler and loader are supplied by the caller. [`FileCompiler`] and [`FileModuleLoader`]
//! implement them on plain files.

use anyhow::{Result, Context, bail};
use guard::guard;
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::codec::{self, JsonCodec, SnapshotCodec};
use crate::schema::Schema;

/// Every transient file written by [`ArtifactCodec`] starts with this prefix.
pub const ARTIFACT_PREFIX: &str = "automigrate_snapshot_";

pub trait SnapshotCompiler: Send + Sync {
    /// Compiles `sources` into a module called `module_name`, written to `output_path`. Fails if
    /// the sources are not valid.
    fn compile(&self, sources: &[PathBuf], module_name: &str, output_path: &Path) -> Result<()>;
}

pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn SnapshotModule>>;
}

/// A loaded module.
pub trait SnapshotModule {
    /// Instantiates every snapshot type defined by the module.
    fn snapshots(&self) -> Vec<Box<dyn ModelSnapshot>>;
}

pub trait ModelSnapshot {
    fn model(&self) -> Schema;
}

#[derive(Debug)]
pub struct ArtifactCodec<C, L> {
    artifact_dir: PathBuf,
    codec: JsonCodec,
    compiler: C,
    loader: L,
}

impl<C: SnapshotCompiler, L: ModuleLoader> ArtifactCodec<C, L> {
    pub fn new(artifact_dir: impl Into<PathBuf>, compiler: C, loader: L) -> Self {
        Self { artifact_dir: artifact_dir.into(), codec: JsonCodec::pretty(), compiler, loader }
    }

    /// Removes artifacts left behind by previous runs. Failures are ignored.
    fn remove_stale_artifacts(&self) {
        let entries = match fs::read_dir(&self.artifact_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Could not list artifact dir {}: {}", self.artifact_dir.display(), err);
                return;
            },
        };
        for entry in entries.flatten() {
            let path = entry.path();
            guard!{let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue }};
            if !name.starts_with(ARTIFACT_PREFIX) { continue }
            if let Err(err) = fs::remove_file(&path) {
                debug!("Could not remove stale artifact {}: {}", path.display(), err);
            }
        }
    }
}

impl<C: SnapshotCompiler, L: ModuleLoader> SnapshotCodec for ArtifactCodec<C, L> {
    fn serialize(&self, schema: &Schema) -> Result<String> {
        self.codec.serialize(schema)
    }

    fn deserialize(&self, text: &str) -> Result<Schema> {
        self.remove_stale_artifacts();
        fs::create_dir_all(&self.artifact_dir)
            .with_context(|| format!("could not create artifact dir {}", self.artifact_dir.display()))?;

        // a fresh id for every load, the id stored in the text may already have been used
        let module_name = format!("{}{}", ARTIFACT_PREFIX, codec::snapshot_id());
        let source_path = self.artifact_dir.join(format!("{}.src", module_name));
        let module_path = self.artifact_dir.join(format!("{}.module", module_name));

        fs::write(&source_path, text)
            .with_context(|| format!("could not write snapshot source {}", source_path.display()))?;
        self.compiler.compile(&[source_path], &module_name, &module_path)
            .with_context(|| format!("could not compile snapshot module {:?}", module_name))?;

        let module = self.loader.load(&module_path)
            .with_context(|| format!("could not load snapshot module {}", module_path.display()))?;
        let mut snapshots = module.snapshots();
        match snapshots.len() {
            1 => Ok(snapshots.remove(0).model()),
            0 => bail!("snapshot module {:?} does not define a snapshot", module_name),
            n => bail!("snapshot module {:?} defines {} snapshots, expected one", module_name, n),
        }
    }
}

/// On-disk format of modules produced by [`FileCompiler`].
#[derive(Debug, Serialize, Deserialize)]
struct ModuleFile {
    name: String,
    snapshots: Vec<Schema>,
}

/// Compiles snapshot sources by validating them and writing the decoded schemas as a module file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCompiler;

impl SnapshotCompiler for FileCompiler {
    fn compile(&self, sources: &[PathBuf], module_name: &str, output_path: &Path) -> Result<()> {
        let mut snapshots = Vec::with_capacity(sources.len());
        for source_path in sources.iter() {
            let text = fs::read_to_string(source_path)
                .with_context(|| format!("could not read {}", source_path.display()))?;
            let schema = codec::decode(&text)
                .with_context(|| format!("invalid snapshot source {}", source_path.display()))?;
            schema.validate()
                .with_context(|| format!("invalid schema in {}", source_path.display()))?;
            snapshots.push(schema);
        }

        let module = ModuleFile { name: module_name.into(), snapshots };
        let bytes = serde_json::to_vec(&module)?;
        fs::write(output_path, bytes)
            .with_context(|| format!("could not write module {}", output_path.display()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileModuleLoader;

struct FileModule {
    snapshots: Vec<Schema>,
}

struct FileSnapshot(Schema);

impl ModuleLoader for FileModuleLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn SnapshotModule>> {
        let bytes = fs::read(path)?;
        let module: ModuleFile = serde_json::from_slice(&bytes)
            .context("module file is corrupted")?;
        Ok(Box::new(FileModule { snapshots: module.snapshots }))
    }
}

impl SnapshotModule for FileModule {
    fn snapshots(&self) -> Vec<Box<dyn ModelSnapshot>> {
        self.snapshots.iter()
            .map(|schema| Box::new(FileSnapshot(schema.clone())) as Box<dyn ModelSnapshot>)
            .collect()
    }
}

impl ModelSnapshot for FileSnapshot {
    fn model(&self) -> Schema {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entity, Field, FieldType};

    fn schema() -> Schema {
        Schema::new().with_entity(Entity::new("notes")
            .field(Field::new("id", FieldType::Integer))
            .field(Field::new("body", FieldType::Text))
            .primary_key(["id"]))
    }

    fn artifacts(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir).unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.starts_with(ARTIFACT_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_compile_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ArtifactCodec::new(dir.path(), FileCompiler, FileModuleLoader);
        let text = codec.serialize(&schema()).unwrap();
        assert_eq!(codec.deserialize(&text).unwrap(), schema());
        // one source and one module
        assert_eq!(artifacts(dir.path()).len(), 2);
    }

    #[test]
    fn test_stale_artifacts_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(format!("{}old.src", ARTIFACT_PREFIX)), "stale").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep me").unwrap();

        let codec = ArtifactCodec::new(dir.path(), FileCompiler, FileModuleLoader);
        let text = codec.serialize(&schema()).unwrap();
        codec.deserialize(&text).unwrap();
        codec.deserialize(&text).unwrap();

        let names = artifacts(dir.path());
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.contains("old")));
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_compilation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ArtifactCodec::new(dir.path(), FileCompiler, FileModuleLoader);
        let err = codec.deserialize("this is not a snapshot").unwrap_err();
        assert!(format!("{:#}", err).contains("could not compile snapshot module"));
    }

    struct EmptyLoader;
    struct EmptyModule;

    impl ModuleLoader for EmptyLoader {
        fn load(&self, _path: &Path) -> Result<Box<dyn SnapshotModule>> {
            Ok(Box::new(EmptyModule))
        }
    }

    impl SnapshotModule for EmptyModule {
        fn snapshots(&self) -> Vec<Box<dyn ModelSnapshot>> {
            Vec::new()
        }
    }

    #[test]
    fn test_module_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let codec = ArtifactCodec::new(dir.path(), FileCompiler, EmptyLoader);
        let text = codec.serialize(&schema()).unwrap();
        assert!(codec.deserialize(&text).is_err());
    }
}
