//! NCBI submission documents (`submission.xml`).
//!
//! Documents are assembled from typed values and serialized in one pass; the
//! description block is written once, followed by one `Action` per BioSample
//! or SRA entry in sample order.

use camino::Utf8Path;
use indexmap::IndexMap;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::debug;

use crate::config::{SraSettings, SubmissionInfo};
use crate::domain::ActionType;
use crate::error::PushError;
use crate::metadata::{MetadataTable, VIRUS_NAME_COLUMN};
use crate::sample::{CheckedSample, DownloadStatus, FileMatch};

pub const SUBMISSION_FILE: &str = "submission.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub comment: String,
    pub organization: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub hold: String,
}

impl Description {
    pub fn from_info(info: &SubmissionInfo, comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            organization: info.organization.clone(),
            email: info.email.clone(),
            first_name: info.first_name.clone(),
            last_name: info.last_name.clone(),
            hold: info.hold.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BioSampleAction {
    pub spuid: String,
    pub namespace: String,
    pub title: String,
    pub organism: String,
    pub bioproject_id: String,
    pub package: String,
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SraAction {
    pub file_path: String,
    pub namespace: String,
    pub bioproject_id: String,
    /// SPUID of the BioSample the run belongs to.
    pub biosample_spuid: String,
    /// SPUID of the SRA run itself.
    pub identifier: String,
    pub attributes: IndexMap<String, String>,
}

/// A packaged GenBank upload (`genbank.zip`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenbankAction {
    pub file_path: String,
    pub spuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BioSample(BioSampleAction),
    Sra(SraAction),
    Genbank(GenbankAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDocument {
    pub description: Description,
    pub actions: Vec<Action>,
}

impl SubmissionDocument {
    pub fn new(description: Description) -> Self {
        Self {
            description,
            actions: Vec::new(),
        }
    }

    pub fn biosample_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::BioSample(_)))
            .count()
    }

    pub fn sra_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::Sra(_)))
            .count()
    }

    /// `file_path` of every SRA action, in document order.
    pub fn sra_files(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|action| match action {
            Action::Sra(sra) => Some(sra.file_path.as_str()),
            _ => None,
        })
    }

    pub fn to_xml(&self) -> Result<String, PushError> {
        let mut out = XmlOut::new();
        out.declaration()?;
        out.open("Submission", &[])?;
        write_description(&mut out, &self.description)?;
        for action in &self.actions {
            out.open("Action", &[])?;
            match action {
                Action::BioSample(bs) => write_biosample(&mut out, bs)?,
                Action::Sra(sra) => write_sra(&mut out, sra)?,
                Action::Genbank(genbank) => write_genbank(&mut out, genbank)?,
            }
            out.close("Action")?;
        }
        out.close("Submission")?;
        out.finish()
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), PushError> {
        let xml = self.to_xml()?;
        crate::store::write_bytes_atomic(path, xml.as_bytes())
    }
}

/// Turns checked samples plus their metadata rows into a document.
pub struct DocumentBuilder<'a> {
    action_type: ActionType,
    info: &'a SubmissionInfo,
    sra: &'a SraSettings,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(action_type: ActionType, info: &'a SubmissionInfo, sra: &'a SraSettings) -> Self {
        Self {
            action_type,
            info,
            sra,
        }
    }

    /// Samples without a metadata row or a `gisaid_virus_name` are skipped.
    /// The SRA part is skipped for samples whose file was not found or is
    /// absent locally.
    pub fn build(
        &self,
        comment: &str,
        samples: &[CheckedSample],
        metadata: &MetadataTable,
    ) -> SubmissionDocument {
        let mut document = SubmissionDocument::new(Description::from_info(self.info, comment));

        for sample in samples {
            let Some(row) = metadata.row(sample.sample_name()) else {
                debug!("{} has no metadata row, skipping", sample.sample_name());
                continue;
            };
            let Some(virus_name) = row.get(VIRUS_NAME_COLUMN) else {
                debug!("{} has no {VIRUS_NAME_COLUMN}, skipping", sample.sample_name());
                continue;
            };

            if self.action_type.includes_biosample() {
                let attributes = row
                    .present_fields()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                document.actions.push(Action::BioSample(BioSampleAction {
                    spuid: sample.submission_id().to_string(),
                    namespace: self.info.spuid_namespace.clone(),
                    title: self.info.title.clone(),
                    organism: self.info.organism.clone(),
                    bioproject_id: self.info.bioproject_id.clone(),
                    package: self.info.package.clone(),
                    attributes,
                }));
            }

            if self.action_type.includes_sra() {
                let file_name = match sample.file_name() {
                    FileMatch::Found(name) => name,
                    FileMatch::NotFound => continue,
                };
                if sample.status() == DownloadStatus::Absent {
                    continue;
                }
                document.actions.push(Action::Sra(SraAction {
                    file_path: self.sra.file_type.file_name(file_name),
                    namespace: self.info.spuid_namespace.clone(),
                    bioproject_id: self.info.bioproject_id.clone(),
                    biosample_spuid: file_name.clone(),
                    identifier: virus_name.trim().to_string(),
                    attributes: self.sra.library.clone(),
                }));
            }
        }

        document
    }
}

fn write_description(out: &mut XmlOut, description: &Description) -> Result<(), PushError> {
    out.open("Description", &[])?;
    out.text_element("Comment", &[], &description.comment)?;
    out.open("Organization", &[("type", "institute"), ("role", "owner")])?;
    out.text_element("Name", &[], &description.organization)?;
    out.open("Contact", &[("email", description.email.as_str())])?;
    out.open("Name", &[])?;
    out.text_element("First", &[], &description.first_name)?;
    out.text_element("Last", &[], &description.last_name)?;
    out.close("Name")?;
    out.close("Contact")?;
    out.close("Organization")?;
    out.empty("Hold", &[("release_date", description.hold.as_str())])?;
    out.close("Description")
}

fn write_biosample(out: &mut XmlOut, bs: &BioSampleAction) -> Result<(), PushError> {
    out.open("AddData", &[("target_db", "BioSample")])?;
    out.open("Data", &[("content_type", "xml")])?;
    out.open("XmlContent", &[])?;
    out.open("BioSample", &[("schema_version", "2.0")])?;
    out.open("SampleId", &[])?;
    out.text_element("SPUID", &[("spuid_namespace", bs.namespace.as_str())], &bs.spuid)?;
    out.close("SampleId")?;
    out.open("Descriptor", &[])?;
    out.text_element("Title", &[], &bs.title)?;
    out.close("Descriptor")?;
    out.open("Organism", &[])?;
    out.text_element("OrganismName", &[], &bs.organism)?;
    out.close("Organism")?;
    out.open("BioProject", &[])?;
    out.text_element("PrimaryId", &[("db", "BioProject")], &bs.bioproject_id)?;
    out.close("BioProject")?;
    out.text_element("Package", &[], &bs.package)?;
    out.open("Attributes", &[])?;
    for (name, value) in &bs.attributes {
        out.text_element("Attribute", &[("attribute_name", name.as_str())], value)?;
    }
    out.close("Attributes")?;
    out.close("BioSample")?;
    out.close("XmlContent")?;
    out.close("Data")?;
    out.open("Identifier", &[])?;
    out.text_element("SPUID", &[("spuid_namespace", bs.namespace.as_str())], &bs.spuid)?;
    out.close("Identifier")?;
    out.close("AddData")
}

fn write_sra(out: &mut XmlOut, sra: &SraAction) -> Result<(), PushError> {
    out.open("AddFiles", &[("target_db", "SRA")])?;
    out.open("File", &[("file_path", sra.file_path.as_str())])?;
    out.text_element("DataType", &[], "generic-data")?;
    out.close("File")?;
    for (name, value) in &sra.attributes {
        out.text_element("Attribute", &[("name", name.as_str())], value)?;
    }
    out.open("AttributeRefId", &[("name", "BioProject")])?;
    out.open("RefId", &[])?;
    out.text_element("PrimaryId", &[("db", "BioProject")], &sra.bioproject_id)?;
    out.close("RefId")?;
    out.close("AttributeRefId")?;
    out.open("AttributeRefId", &[("name", "BioSample")])?;
    out.open("RefId", &[])?;
    out.text_element(
        "SPUID",
        &[("spuid_namespace", sra.namespace.as_str())],
        &sra.biosample_spuid,
    )?;
    out.close("RefId")?;
    out.close("AttributeRefId")?;
    out.open("Identifier", &[])?;
    out.text_element("SPUID", &[("spuid_namespace", sra.namespace.as_str())], &sra.identifier)?;
    out.close("Identifier")?;
    out.close("AddFiles")
}

fn write_genbank(out: &mut XmlOut, genbank: &GenbankAction) -> Result<(), PushError> {
    out.open("AddFiles", &[("target_db", "GenBank")])?;
    out.open("File", &[("file_path", genbank.file_path.as_str())])?;
    out.text_element("DataType", &[], "genbank-submission-package")?;
    out.close("File")?;
    out.text_element("Attribute", &[("name", "wizard")], "BankIt_SARSCoV2_api")?;
    out.open("Identifier", &[])?;
    out.text_element("SPUID", &[("spuid_namespace", "ncbi-sarscov2-genbank")], &genbank.spuid)?;
    out.close("Identifier")?;
    out.close("AddFiles")
}

/// Thin wrapper over the quick-xml writer with two-space indentation.
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), PushError> {
        self.writer
            .write_event(event)
            .map_err(|err| PushError::Xml(err.to_string()))
    }

    fn declaration(&mut self) -> Result<(), PushError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), PushError> {
        let mut start = BytesStart::new(name);
        for &attribute in attributes {
            start.push_attribute(attribute);
        }
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<(), PushError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), PushError> {
        let mut start = BytesStart::new(name);
        for &attribute in attributes {
            start.push_attribute(attribute);
        }
        self.event(Event::Empty(start))
    }

    fn text_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> Result<(), PushError> {
        self.open(name, attributes)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String, PushError> {
        String::from_utf8(self.writer.into_inner()).map_err(|err| PushError::Xml(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::FileExtension;
    use crate::metadata::MetadataRow;
    use crate::sample::{IdentifierResolver, check_presence};

    fn info() -> SubmissionInfo {
        SubmissionInfo {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.org".to_string(),
            hold: "2021-06-01".to_string(),
            organization: "Example Lab".to_string(),
            bioproject_id: "PRJNA612578".to_string(),
            spuid_namespace: "SEARCH".to_string(),
            title: "hcov-19 genomics".to_string(),
            organism: "Severe acute respiratory syndrome coronavirus 2".to_string(),
            package: "SARS-CoV-2.cl.1.0".to_string(),
        }
    }

    fn sra() -> SraSettings {
        SraSettings {
            file_type: "bam".parse().unwrap(),
            library: IndexMap::from([("library_layout".to_string(), "PAIRED".to_string())]),
        }
    }

    fn metadata(rows: &[[&str; 3]]) -> MetadataTable {
        let headers = vec![
            "sample_name".to_string(),
            VIRUS_NAME_COLUMN.to_string(),
            "collection_date".to_string(),
        ];
        let rows = rows
            .iter()
            .map(|cells| {
                MetadataRow::new(
                    headers
                        .iter()
                        .cloned()
                        .zip(cells.iter().map(|cell| cell.to_string()))
                        .collect(),
                )
            })
            .collect();
        MetadataTable::from_rows(headers, rows)
    }

    /// `run1_100.bam` exists on disk; `run1_300` resolves but is missing.
    fn checked(names: &[&str]) -> (tempfile::TempDir, Vec<CheckedSample>) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::write(dir.join("run1_100.bam").as_std_path(), b"bam").unwrap();
        let ext: FileExtension = "bam".parse().unwrap();
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let resolved = IdentifierResolver::from_stems(["run1_100", "run1_300"]).resolve_all(&names);
        (temp, check_presence(&dir, resolved, &ext))
    }

    #[test]
    fn sample_without_virus_name_gets_no_action() {
        let (_temp, samples) = checked(&["SEARCH-100"]);
        let table = metadata(&[["SEARCH-100", "", "2021-01-02"]]);
        let info = info();
        let sra = sra();

        let document = DocumentBuilder::new(ActionType::BioSampleSra, &info, &sra)
            .build("batch", &samples, &table);

        assert!(document.actions.is_empty());
        assert_eq!(document.sra_files().count(), 0);
    }

    #[test]
    fn unresolved_sample_gets_biosample_only() {
        let (_temp, samples) = checked(&["SEARCH-SAN"]);
        let table = metadata(&[["SEARCH-SAN", "hCoV-19/USA/CA-SEARCH-SAN/2021", "2021-01-02"]]);
        let info = info();
        let sra = sra();

        let document = DocumentBuilder::new(ActionType::BioSampleSra, &info, &sra)
            .build("batch", &samples, &table);

        assert_eq!(document.biosample_count(), 1);
        assert_eq!(document.sra_count(), 0);
        let Action::BioSample(bs) = &document.actions[0] else {
            panic!("expected a BioSample action");
        };
        assert_eq!(bs.spuid, "SEARCH-SAN");
    }

    #[test]
    fn absent_file_gets_no_sra_action() {
        let (_temp, samples) = checked(&["SEARCH-100", "SEARCH-300"]);
        assert_eq!(samples[1].status(), DownloadStatus::Absent);
        let table = metadata(&[
            ["SEARCH-100", "hCoV-19/USA/CA-SEARCH-100/2021", "2021-01-02"],
            ["SEARCH-300", "hCoV-19/USA/CA-SEARCH-300/2021", "2021-01-03"],
        ]);
        let info = info();
        let sra = sra();

        let document = DocumentBuilder::new(ActionType::BioSampleSra, &info, &sra)
            .build("batch", &samples, &table);

        assert_eq!(document.biosample_count(), 2);
        assert_eq!(document.sra_files().collect::<Vec<_>>(), vec!["run1_100.bam"]);
        let Action::Sra(run) = &document.actions[1] else {
            panic!("expected the SRA action after its BioSample");
        };
        assert_eq!(run.biosample_spuid, "run1_100");
        assert_eq!(run.identifier, "hCoV-19/USA/CA-SEARCH-100/2021");
    }

    #[test]
    fn nan_cells_become_no_attribute() {
        let (_temp, samples) = checked(&["SEARCH-100"]);
        let table = metadata(&[["SEARCH-100", "hCoV-19/USA/CA-SEARCH-100/2021", "nan"]]);
        let info = info();
        let sra = sra();

        let document = DocumentBuilder::new(ActionType::BioSample, &info, &sra)
            .build("batch", &samples, &table);

        assert_eq!(document.sra_count(), 0);
        let Action::BioSample(bs) = &document.actions[0] else {
            panic!("expected a BioSample action");
        };
        assert!(!bs.attributes.contains_key("collection_date"));
        assert_eq!(bs.attributes.len(), 2);
        let xml = document.to_xml().unwrap();
        assert!(!xml.contains("collection_date"));
        assert!(!xml.contains(">nan<"));
    }

    #[test]
    fn text_is_escaped() {
        let mut document = SubmissionDocument::new(Description {
            comment: "a < b & c".to_string(),
            organization: "Lab".to_string(),
            email: "lab@example.org".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            hold: "2021-01-01".to_string(),
        });
        document.actions.push(Action::Genbank(GenbankAction {
            file_path: "genbank.zip".to_string(),
            spuid: "2021-01-01.sarscov2".to_string(),
        }));
        let xml = document.to_xml().unwrap();
        assert!(xml.contains("<Comment>a &lt; b &amp; c</Comment>"));
        assert!(xml.contains("<Hold release_date=\"2021-01-01\"/>"));
        assert!(xml.contains("file_path=\"genbank.zip\""));
        assert_eq!(xml.matches("<Description>").count(), 1);
    }
}
