use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::PushError;
use crate::sample::CheckedSample;
use crate::submission::SUBMISSION_FILE;

/// Per-batch snapshot of the sample records.
pub const SNAPSHOT_FILE: &str = "file_info.json";
/// Zero-byte marker uploaded last to tell the remote the batch is complete.
pub const SENTINEL_FILE: &str = "submit.ready";

/// Layout of a run's output root: one directory per batch.
#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: Utf8PathBuf) -> Self {
        Self { output_root }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn batch_dir(&self, action_name: &str) -> Utf8PathBuf {
        self.output_root.join(action_name)
    }

    pub fn ensure_batch_dir(&self, action_name: &str) -> Result<Utf8PathBuf, PushError> {
        let dir = self.batch_dir(action_name);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    pub fn snapshot_path(&self, action_name: &str) -> Utf8PathBuf {
        self.batch_dir(action_name).join(SNAPSHOT_FILE)
    }

    pub fn submission_path(&self, action_name: &str) -> Utf8PathBuf {
        self.batch_dir(action_name).join(SUBMISSION_FILE)
    }

    pub fn sentinel_path(&self, action_name: &str) -> Utf8PathBuf {
        self.batch_dir(action_name).join(SENTINEL_FILE)
    }

    /// Writes the batch's records as a JSON array, replacing any earlier snapshot.
    pub fn write_snapshot(
        &self,
        action_name: &str,
        samples: &[CheckedSample],
    ) -> Result<Utf8PathBuf, PushError> {
        let path = self.snapshot_path(action_name);
        write_json(&path, samples)?;
        Ok(path)
    }

    /// Creates (or truncates) the empty completion marker.
    pub fn write_sentinel(&self, action_name: &str) -> Result<Utf8PathBuf, PushError> {
        let path = self.sentinel_path(action_name);
        write_bytes_atomic(&path, &[])?;
        Ok(path)
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), PushError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| PushError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PushError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
    }
    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| PushError::Filesystem(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("rename {tmp_path}: {err}")))?;
    Ok(())
}

pub fn utf8_path(path: &Path) -> Result<Utf8PathBuf, PushError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| PushError::Filesystem(format!("non UTF-8 path: {}", path.display())))
}

/// Regular files directly under `dir` whose names end with `suffix`, sorted.
pub fn list_files_with_suffix(dir: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>, PushError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("list {dir}: {err}")))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PushError::Filesystem(err.to_string()))?;
        let path = utf8_path(&entry.path())?;
        let matches = path.file_name().is_some_and(|name| name.ends_with(suffix));
        if matches && path.as_std_path().is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
