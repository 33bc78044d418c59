//! One JSON file per key under a `keys/` directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keyguard_utils::{read_json, write_json_atomic};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::KeystoreError;

pub(crate) struct KeyDir {
    dir: PathBuf,
}

impl KeyDir {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            dir: root.join("keys"),
        }
    }

    pub(crate) fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    pub(crate) fn path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.json"))
    }

    pub(crate) fn save<T: Serialize>(&self, key_id: &str, record: &T) -> io::Result<()> {
        write_json_atomic(&self.path(key_id), record)
    }

    /// Remove a key file. A file that is already gone is not an error.
    pub(crate) fn remove(&self, key_id: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key_id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Every `*.json` file in the directory. An undecodable file means the
    /// store is damaged.
    pub(crate) fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, KeystoreError> {
        let mut out = Vec::new();
        for path in self.files()? {
            let record = read_json(&path).map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => {
                    KeystoreError::Corrupted(format!("{}: {e}", path.display()))
                }
                _ => KeystoreError::Io(e),
            })?;
            out.push(record);
        }
        Ok(out)
    }

    pub(crate) fn files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
