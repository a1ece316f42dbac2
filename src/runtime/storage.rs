//! Filesystem layout helpers, atomic writes, and the checkpoint store
//!
//! Everything persistent lives under one root directory:
//!
//! ```text
//! <root>/config.json
//! <root>/runs/<YYYYmmdd_HHMMSS>.jsonl
//! <root>/checkpoints/<name>.json
//! ```
//!
//! Files that are replaced in place (the config, checkpoints) are written
//! through a temp file, synced, and renamed over the target.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RuntimeConfig;
use super::error::{StorageError, StorageResult};

/// Storage manager for engine persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the run log directory path
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Get the checkpoint directory path
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        atomic_write(path, data).with_context(|| format!("Failed to write {:?} atomically", path))
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Failed to create directory: {:?}", path))
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    // Sync parent directory so the rename itself is durable
    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Initialize storage directories under `root`
pub fn init_storage(root: &Path) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());

    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.runs_dir())?;
    storage.create_dir_all(&storage.checkpoints_dir())?;

    Ok(())
}

/// Write engine configuration
pub fn write_config(config: &RuntimeConfig) -> Result<()> {
    let storage = Storage::new(config.root.clone());
    let config_path = storage.config_path();

    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;

    storage.write_atomic(&config_path, &json)?;

    Ok(())
}

/// Load engine configuration
pub fn load_config(root: &Path) -> Result<RuntimeConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();

    let data = storage.read_file(&config_path)?;
    let mut config: RuntimeConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;
    config.root = root.to_path_buf();

    Ok(config)
}

/// Metadata describing a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Checkpoint name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Hex blake3 digest of the payload.
    pub digest: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    name: String,
    created_at: DateTime<Utc>,
    digest: String,
    payload: Value,
}

/// Named, digest-checked saves of a run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at `<root>/checkpoints`.
    pub fn for_storage(storage: &Storage) -> Self {
        Self::new(storage.checkpoints_dir())
    }

    /// Directory holding the checkpoints.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names are limited to `[A-Za-z0-9_-]+` so they are always a single
    /// path component.
    pub fn validate_name(name: &str) -> StorageResult<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidName(name.to_string()))
        }
    }

    /// Default name for an unnamed save.
    pub fn default_name(now: DateTime<Local>) -> String {
        now.format("%Y%m%d_%H%M%S").to_string()
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Save `payload`, replacing any checkpoint with the same name.
    pub fn save(&self, name: Option<&str>, payload: Value) -> StorageResult<CheckpointInfo> {
        let name = match name {
            Some(name) => name.to_string(),
            None => Self::default_name(Local::now()),
        };
        Self::validate_name(&name)?;

        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;

        let digest = blake3::hash(&serde_json::to_vec(&payload)?).to_hex().to_string();
        let file = CheckpointFile {
            name: name.clone(),
            created_at: Utc::now(),
            digest,
            payload,
        };
        let path = self.path_for(&name);
        let bytes = serde_json::to_vec_pretty(&file)?;
        atomic_write(&path, &bytes).map_err(Self::io_err(&path))?;

        tracing::info!(checkpoint = %name, path = %path.display(), "checkpoint saved");
        Ok(CheckpointInfo {
            name: file.name,
            created_at: file.created_at,
            digest: file.digest,
        })
    }

    fn read(&self, name: &str) -> StorageResult<CheckpointFile> {
        Self::validate_name(name)?;
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(err) => return Err(Self::io_err(&path)(err)),
        };
        serde_json::from_slice(&bytes).map_err(|_| StorageError::Corrupted {
            name: name.to_string(),
        })
    }

    /// Load a checkpoint's payload, verifying its digest.
    pub fn load(&self, name: &str) -> StorageResult<(CheckpointInfo, Value)> {
        let file = self.read(name)?;
        let digest = blake3::hash(&serde_json::to_vec(&file.payload)?).to_hex().to_string();
        if digest != file.digest {
            tracing::warn!(checkpoint = %name, "checkpoint digest mismatch");
            return Err(StorageError::Corrupted {
                name: name.to_string(),
            });
        }
        let info = CheckpointInfo {
            name: file.name,
            created_at: file.created_at,
            digest: file.digest,
        };
        Ok((info, file.payload))
    }

    /// Every readable checkpoint, newest first. Unreadable files are skipped.
    pub fn list(&self) -> StorageResult<Vec<CheckpointInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(Self::io_err(&self.dir))? {
            let path = entry.map_err(Self::io_err(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read(name) {
                Ok(file) => out.push(CheckpointInfo {
                    name: file.name,
                    created_at: file.created_at,
                    digest: file.digest,
                }),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping checkpoint"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    /// Remove a checkpoint.
    pub fn delete(&self, name: &str) -> StorageResult<()> {
        Self::validate_name(name)?;
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(checkpoint = %name, "checkpoint deleted");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(err) => Err(Self::io_err(&path)(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_init_storage() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        init_storage(root).unwrap();

        assert!(root.join("runs").exists());
        assert!(root.join("checkpoints").exists());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        init_storage(&root).unwrap();

        let config = RuntimeConfig {
            root: root.clone(),
            port: 23456,
            settle_delay_ms: 50,
            completion_timeout_ms: None,
            ..RuntimeConfig::default()
        };

        write_config(&config).unwrap();
        let loaded = load_config(&root).unwrap();

        assert_eq!(loaded.port, 23456);
        assert_eq!(loaded.settle_delay_ms, 50);
        assert_eq!(loaded.completion_timeout_ms, None);
        assert_eq!(loaded.root, root);
    }

    #[test]
    fn test_atomic_write() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let test_file = temp.path().join("test.dat");

        let data = b"Hello, world!";
        storage.write_atomic(&test_file, data).unwrap();

        let read_data = storage.read_file(&test_file).unwrap();
        assert_eq!(data, &read_data[..]);
        assert!(!temp.path().join("test.tmp").exists());
    }

    #[test]
    fn test_checkpoint_save_load() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path().join("checkpoints"));
        let payload = json!({ "phase": 7, "run": { "dollars": 12 } });

        let info = store.save(Some("ante_1"), payload.clone()).unwrap();
        assert_eq!(info.name, "ante_1");
        assert_eq!(info.digest.len(), 64);

        let (loaded, restored) = store.load("ante_1").unwrap();
        assert_eq!(loaded, info);
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_checkpoint_default_name() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        let info = store.save(None, json!({})).unwrap();

        assert_eq!(info.name.len(), "20261016_093000".len());
        assert!(CheckpointStore::validate_name(&info.name).is_ok());
    }

    #[test]
    fn test_checkpoint_rejects_bad_names() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());

        for name in ["", "../escape", "a b", "x.json"] {
            assert!(matches!(
                store.save(Some(name), json!({})),
                Err(StorageError::InvalidName(_))
            ));
        }
        assert!(matches!(store.load("../x"), Err(StorageError::InvalidName(_))));
    }

    #[test]
    fn test_checkpoint_missing_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());

        assert!(matches!(store.load("nope"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("nope"), Err(StorageError::NotFound(_))));

        store.save(Some("keep"), json!(1)).unwrap();
        store.delete("keep").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_checkpoint_detects_tampering() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        store.save(Some("run"), json!({ "dollars": 4 })).unwrap();

        let path = temp.path().join("run.json");
        let mut file: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        file["payload"]["dollars"] = json!(999);
        fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        assert!(matches!(store.load("run"), Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn test_checkpoint_list_newest_first() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        store.save(Some("first"), json!(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save(Some("second"), json!(2)).unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["second", "first"]);
    }
}
