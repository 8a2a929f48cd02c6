use assert_matches::assert_matches;
use chrono::NaiveDate;

use ncbi_batch_push::batch::BatchPlanner;
use ncbi_batch_push::domain::{ActionType, FileExtension, SubmissionType};
use ncbi_batch_push::error::PushError;
use ncbi_batch_push::sample::{FileMatch, IdentifierResolver, check_presence};

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn parse_action_types() {
    assert_eq!("bs".parse::<ActionType>().unwrap(), ActionType::BioSample);
    assert_eq!("sra".parse::<ActionType>().unwrap(), ActionType::Sra);
    assert_eq!(" bs_sra ".parse::<ActionType>().unwrap(), ActionType::BioSampleSra);
    assert!(!ActionType::Sra.includes_biosample());
    let err = "genbank".parse::<ActionType>().unwrap_err();
    assert_matches!(err, PushError::InvalidActionType(_));
}

#[test]
fn parse_submission_types() {
    assert_eq!("Production".parse::<SubmissionType>().unwrap(), SubmissionType::Production);
    let err = "Staging".parse::<SubmissionType>().unwrap_err();
    assert_matches!(err, PushError::InvalidSubmissionType(_));
}

#[test]
fn parse_file_extension_invalid() {
    let err = "b am".parse::<FileExtension>().unwrap_err();
    assert_matches!(err, PushError::InvalidConfig { .. });
}

#[test]
fn planner_covers_every_name_once() {
    let all: Vec<String> = (0..17).map(|i| format!("SEARCH-{i}")).collect();
    let planner = BatchPlanner::new(&all, 8);
    assert_eq!(planner.batch_count(), 3);

    let batches: Vec<_> = planner.collect();
    assert_eq!(batches.len(), 3);
    assert_eq!((batches[2].start, batches[2].end), (16, 17));
    let flattened: Vec<&String> = batches.iter().flat_map(|b| b.sample_names).collect();
    assert_eq!(flattened, all.iter().collect::<Vec<_>>());

    let date = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
    assert_eq!(batches[1].action_name("hcov", date), "hcov_2021-03-04_8_16");
}

#[test]
fn empty_name_list_has_no_batches() {
    let all: Vec<String> = Vec::new();
    assert_eq!(BatchPlanner::new(&all, 8000).count(), 0);
}

#[test]
fn resolver_and_presence_over_directory() {
    let temp = tempfile::tempdir().unwrap();
    let dir = camino::Utf8Path::from_path(temp.path()).unwrap();
    for file in ["run1_100.bam", "run1_300.bam.bai", "notes_200.txt"] {
        std::fs::write(dir.join(file), b"").unwrap();
    }
    let bam: FileExtension = "bam".parse().unwrap();
    let resolver = IdentifierResolver::from_dir(dir, &bam).unwrap();

    let resolved = resolver.resolve_all(&names(&["SEARCH-100", "SEARCH-200", "SEARCH-300"]));
    assert_eq!(resolved[0].file_name(), &FileMatch::Found("run1_100".to_string()));
    assert_eq!(resolved[1].file_name(), &FileMatch::NotFound);
    assert_eq!(resolved[2].file_name(), &FileMatch::NotFound);

    let checked = check_presence(dir, resolved, &bam);
    assert!(checked[0].is_present());
    assert_eq!(checked[0].full_filepath(), Some(dir.join("run1_100.bam").as_path()));
    assert!(!checked[1].is_present());
    assert_eq!(checked[1].submission_id(), "SEARCH-200");
}

#[test]
fn resolved_file_removed_before_check_is_absent() {
    let temp = tempfile::tempdir().unwrap();
    let dir = camino::Utf8Path::from_path(temp.path()).unwrap();
    let bam: FileExtension = "bam".parse().unwrap();
    let resolver = IdentifierResolver::from_file_names(["run1_100.bam"], &bam);

    let checked = check_presence(dir, resolver.resolve_all(&names(&["SEARCH-100"])), &bam);
    assert!(!checked[0].is_present());
    assert_eq!(checked[0].file_name(), &FileMatch::Found("run1_100".to_string()));
    assert!(checked[0].full_filepath().is_none());
}
