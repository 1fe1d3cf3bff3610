//! json-file-adapter: flat-file implementation of the ProductStore port.
//!
//! Purpose
//! - Persist the whole product collection as one JSON array in a single file.
//! - Implements the `ProductStore` trait from the `domain` crate.
//!
//! Notes
//! - Every save rewrites the file, pretty-printed with 2-space indentation.
//! - Saves go to a temp file in the same directory which is then renamed over
//!   the target, so a reader sees either the old or the new collection.
//! - A missing file is an error on load; the store never creates one on read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use domain::{Collection, CoreError, ProductStore};
use tempfile::NamedTempFile;

/// File-backed product store.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn storage_err(&self, what: &str, err: impl std::fmt::Display) -> CoreError {
        CoreError::Storage(format!("{} {}: {}", what, self.path.display(), err))
    }
}

impl ProductStore for JsonFileStore {
    fn load(&self) -> Result<Collection, CoreError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| self.storage_err("read", e))?;
        serde_json::from_str(&raw).map_err(|e| self.storage_err("parse", e))
    }

    fn save(&self, products: &Collection) -> Result<(), CoreError> {
        let body = serde_json::to_string_pretty(products)
            .map_err(|e| self.storage_err("serialize", e))?;
        let mut tmp = NamedTempFile::new_in(self.dir())
            .map_err(|e| self.storage_err("create temp for", e))?;
        tmp.write_all(body.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| self.storage_err("write", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.storage_err("replace", e))?;
        Ok(())
    }
}
