//! On-disk wallet and transaction records, one JSON file each.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keyguard_utils::{read_json, write_json_atomic};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) struct RecordDir {
    dir: PathBuf,
}

impl RecordDir {
    pub(crate) fn open(root: &Path, name: &str) -> io::Result<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub(crate) fn save<T: Serialize>(&self, id: &str, record: &T) -> io::Result<()> {
        write_json_atomic(&self.path(id), record)
    }

    pub(crate) fn remove(&self, id: &str) -> io::Result<()> {
        match fs::remove_file(self.path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub(crate) fn load_all<T: DeserializeOwned>(&self) -> io::Result<Vec<T>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|p| read_json(p)).collect()
    }
}
