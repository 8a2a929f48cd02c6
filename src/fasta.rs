//! Sequence id cleanup for GenBank FASTA uploads.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::PushError;

pub const DEFAULT_MARKER: &str = "SEARCH";
pub const REFORMAT_FILE: &str = "sequences.reformat.fsa";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReformatSummary {
    pub records: usize,
    pub skipped_headers: usize,
    pub duplicates: usize,
}

/// Extracts sample ids from FASTA headers: the text starting at the marker
/// and running up to the next `/`.
#[derive(Debug, Clone)]
pub struct IdExtractor {
    pattern: Regex,
}

impl IdExtractor {
    pub fn new(marker: &str) -> Result<Self, PushError> {
        if marker.is_empty() {
            return Err(PushError::Fasta("id marker must not be empty".to_string()));
        }
        let pattern = Regex::new(&format!("{}[^/]*", regex::escape(marker)))
            .map_err(|err| PushError::Fasta(err.to_string()))?;
        Ok(Self { pattern })
    }

    pub fn extract<'a>(&self, header: &'a str) -> Option<&'a str> {
        self.pattern
            .find(header)
            .map(|found| found.as_str().trim_end())
    }
}

/// Sequences keyed by id, in first-seen order. A repeated id keeps its
/// position and takes the later sequence.
pub fn read_records<R: BufRead>(
    reader: R,
    extractor: &IdExtractor,
) -> Result<(IndexMap<String, String>, ReformatSummary), PushError> {
    let mut records: IndexMap<String, String> = IndexMap::new();
    let mut summary = ReformatSummary {
        records: 0,
        skipped_headers: 0,
        duplicates: 0,
    };
    // `None` while inside a record whose header had no id
    let mut current: Option<String> = None;
    let mut seen_header = false;

    for line in reader.lines() {
        let line = line.map_err(|err| PushError::Fasta(err.to_string()))?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            seen_header = true;
            current = match extractor.extract(header) {
                Some(id) => {
                    if records.insert(id.to_string(), String::new()).is_some() {
                        summary.duplicates += 1;
                    }
                    Some(id.to_string())
                }
                None => {
                    warn!("header without id marker, skipping record: {header}");
                    summary.skipped_headers += 1;
                    None
                }
            };
            continue;
        }
        if line.is_empty() {
            continue;
        }
        if !seen_header {
            return Err(PushError::Fasta("sequence data before first header".to_string()));
        }
        if let Some(id) = &current {
            if let Some(sequence) = records.get_mut(id) {
                sequence.push_str(line.trim());
            }
        }
    }

    summary.records = records.len();
    Ok((records, summary))
}

fn open_fasta(path: &Utf8Path) -> Result<Box<dyn BufRead>, PushError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("open {path}: {err}")))?;
    let reader: Box<dyn Read> = if path.extension() == Some("gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Rewrites `input` as single-line records with cleaned ids.
pub fn reformat_fasta(
    input: &Utf8Path,
    output: &Utf8Path,
    marker: &str,
) -> Result<ReformatSummary, PushError> {
    let extractor = IdExtractor::new(marker)?;
    let (records, summary) = read_records(open_fasta(input)?, &extractor)?;

    let file = File::create(output.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("create {output}: {err}")))?;
    let mut writer = BufWriter::new(file);
    for (id, sequence) in &records {
        writeln!(writer, ">{id}\n{sequence}")
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| PushError::Filesystem(err.to_string()))?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn extracts_id_up_to_slash() {
        let extractor = IdExtractor::new(DEFAULT_MARKER).unwrap();
        assert_eq!(
            extractor.extract("hCoV-19/USA/SEARCH-100-SAN/2020"),
            Some("SEARCH-100-SAN")
        );
        assert_eq!(extractor.extract("SEARCH-200"), Some("SEARCH-200"));
        assert_eq!(extractor.extract("hCoV-19/USA/CA-1/2020"), None);
    }

    #[test]
    fn duplicates_keep_position_and_last_sequence() {
        let input = ">x/SEARCH-1/2020\nAC\nGT\n>SEARCH-2\nTT\n>y/SEARCH-1/2021\nGG\n>no id\nCC\n";
        let extractor = IdExtractor::new(DEFAULT_MARKER).unwrap();
        let (records, summary) = read_records(Cursor::new(input), &extractor).unwrap();
        let entries: Vec<_> = records.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(entries, vec![("SEARCH-1", "GG"), ("SEARCH-2", "TT")]);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.skipped_headers, 1);
    }

    #[test]
    fn reads_gzip_input() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let input = dir.join("seqs.fasta.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b">a/SEARCH-9/2020\nACGT\n").unwrap();
        std::fs::write(&input, encoder.finish().unwrap()).unwrap();

        let output = dir.join(REFORMAT_FILE);
        let summary = reformat_fasta(&input, &output, DEFAULT_MARKER).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), ">SEARCH-9\nACGT\n");
    }
}
