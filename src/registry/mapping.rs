//! Durable name -> resource-id mapping.
//!
//! The mapping is one JSON object rewritten in full on every change. Writes go
//! to a sibling temp file that is fsynced and renamed over the target, so a
//! reader sees either the previous mapping or the new one.

use crate::error::{NotifyError, Result};
use crate::types::ResourceId;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk location of a topic mapping.
#[derive(Clone, Debug)]
pub struct MappingFile {
    path: PathBuf,
}

impl MappingFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the mapping. A missing file is an empty mapping.
    pub fn load(&self) -> Result<BTreeMap<String, ResourceId>> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&contents).map_err(|e| {
            NotifyError::Corruption(format!(
                "topic mapping {} is unreadable: {e}",
                self.path.display()
            ))
        })
    }

    /// Replace the mapping with `map`.
    pub fn store(&self, map: &BTreeMap<String, ResourceId>) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(map)?;
        let temp = self.temp_path();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)?;

        // Make the rename itself durable.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                warn!(
                    path = %parent.display(),
                    error = %e,
                    "failed to sync mapping directory"
                );
            }
        }

        Ok(())
    }
}
