use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PushError;

/// Writes `files` into a new archive at `zip_path`, flat, under their base
/// names.
pub fn create_zip(zip_path: &Utf8Path, files: &[Utf8PathBuf]) -> Result<(), PushError> {
    let file = fs::File::create(zip_path.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("create zip {zip_path}: {err}")))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .ok_or_else(|| PushError::Filesystem(format!("{path} has no file name")))?;
        let mut source = fs::File::open(path.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("open {path}: {err}")))?;
        writer
            .start_file(name, options)
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
        io::copy(&mut source, &mut writer)
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| PushError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Reads every entry to the end; returns the entry names.
pub fn validate_zip(zip_path: &Utf8Path) -> Result<Vec<String>, PushError> {
    let file = fs::File::open(zip_path.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| PushError::Filesystem(err.to_string()))?;

    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        names.push(entry.name().to_string());
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
    }
    Ok(names)
}
