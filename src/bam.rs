//! Pruning of local BAM files that have no metadata row.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::error::PushError;
use crate::metadata::{MetadataTable, SAMPLE_NAME_COLUMN};
use crate::store;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PruneResult {
    pub kept: Vec<Utf8PathBuf>,
    pub removed: Vec<Utf8PathBuf>,
    pub dry_run: bool,
}

/// `SEARCH-100_L001.sorted.bam` → `SEARCH-100`.
pub fn sample_prefix(file_name: &str) -> &str {
    let head = file_name.split('_').next().unwrap_or(file_name);
    head.split('.').next().unwrap_or(head)
}

/// Deletes every `*.bam` directly under `bam_dir` whose sample prefix is not
/// a `sample_name` in the metadata table. With `dry_run` nothing is deleted.
pub fn prune_bams(
    metadata_path: &Utf8Path,
    bam_dir: &Utf8Path,
    dry_run: bool,
) -> Result<PruneResult, PushError> {
    let table = MetadataTable::read(metadata_path)?;
    table.require_column(metadata_path, SAMPLE_NAME_COLUMN)?;
    let known: HashSet<String> = table.sample_names().into_iter().collect();

    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for path in store::list_files_with_suffix(bam_dir, ".bam")? {
        let name = path.file_name().unwrap_or_default();
        if known.contains(sample_prefix(name)) {
            kept.push(path);
            continue;
        }
        if !dry_run {
            fs::remove_file(path.as_std_path())
                .map_err(|err| PushError::Filesystem(format!("remove {path}: {err}")))?;
        }
        removed.push(path);
    }
    info!(
        "{} BAM files kept, {} {}",
        kept.len(),
        removed.len(),
        if dry_run { "would be removed" } else { "removed" }
    );
    Ok(PruneResult {
        kept,
        removed,
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_stops_at_underscore_then_dot() {
        assert_eq!(sample_prefix("SEARCH-100_L001.bam"), "SEARCH-100");
        assert_eq!(sample_prefix("SEARCH-200.sorted.bam"), "SEARCH-200");
    }

    #[test]
    fn dry_run_keeps_files() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let metadata = dir.join("meta.csv");
        fs::write(&metadata, "sample_name,host\nSEARCH-100,Human\n").unwrap();
        fs::write(dir.join("SEARCH-100_L001.bam"), b"").unwrap();
        fs::write(dir.join("SEARCH-999_L001.bam"), b"").unwrap();

        let dry = prune_bams(&metadata, dir, true).unwrap();
        assert_eq!(dry.removed, vec![dir.join("SEARCH-999_L001.bam")]);
        assert!(dir.join("SEARCH-999_L001.bam").as_std_path().exists());

        let real = prune_bams(&metadata, dir, false).unwrap();
        assert_eq!(real.kept, vec![dir.join("SEARCH-100_L001.bam")]);
        assert!(!dir.join("SEARCH-999_L001.bam").as_std_path().exists());
    }
}
