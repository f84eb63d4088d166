use std::cell::RefCell;
use std::fs;
use std::path::Path;

use assert_matches::assert_matches;

use phage_host_prep::app::{
    App, ExtractRequest, FilterRequest, MapRequest, ProgressEvent, ProgressSink, SampleRequest,
    StrainSource, provenance_path,
};
use phage_host_prep::config::{Config, ConfigLoader, SampleOverrides};
use phage_host_prep::contigs::UniverseSource;
use phage_host_prep::error::PrepError;
use phage_host_prep::sampler::ExhaustionPolicy;

#[derive(Default)]
struct RecordingSink {
    messages: RefCell<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.borrow_mut().push(event.message);
    }
}

fn app() -> App {
    App::new(ConfigLoader::resolve_config(Config::default()).unwrap())
}

const ANNOTATIONS: &str = "sample\tcontig\n\
GCA_000000001.1_-_A\tPH1.1\n\
GCA_000000001.1_-_A\tPH2.1\n\
GCA_000000001.1_-_A\tPH3.1\n\
GCA_000000002.1_-_B\tPH2.1\n\
GCA_000000002.1_-_B\tPH4.1\n\
GCA_000000003.1_-_C\tPH5.1\n\
GCA_000000003.1_-_C\tPH6.1\n\
GCA_000000003.1_-_C\tPH9.1\n";

const CONTIGS: &str = "PH1.1\nPH2.1\nPH3.1\nPH4.1\nPH5.1\nPH6.1\n";

fn overrides() -> SampleOverrides {
    SampleOverrides {
        num_hosts: Some(3),
        max_pos_per_host: Some(2),
        neg_per_pos: Some(1),
        seed: Some(7),
        on_exhausted: None,
    }
}

fn prepare_filtered_pairs(dir: &Path) -> std::path::PathBuf {
    let annotations = dir.join("annotations.tsv");
    let contigs = dir.join("contigs.txt");
    fs::write(&annotations, ANNOTATIONS).unwrap();
    fs::write(&contigs, CONTIGS).unwrap();

    let app = app();
    let sink = RecordingSink::default();
    let pairs = dir.join("pairs.tsv");
    let hosts = dir.join("hosts.txt");
    let extracted = app
        .extract(
            ExtractRequest {
                annotations: &annotations,
                species: None,
                out_pairs: &pairs,
                out_hosts: &hosts,
            },
            &sink,
        )
        .unwrap();
    assert_eq!(extracted.stats.pairs, 8);
    assert_eq!(
        fs::read_to_string(&hosts).unwrap(),
        "GCA_000000001.1\nGCA_000000002.1\nGCA_000000003.1\n"
    );

    let filtered = dir.join("filtered.tsv");
    let result = app
        .filter(
            FilterRequest {
                pairs: &pairs,
                universe: UniverseSource::ContigList(&contigs),
                out: &filtered,
                out_contigs: None,
            },
            &sink,
        )
        .unwrap();
    assert_eq!(result.stats.pairs_kept, 7);
    assert_eq!(result.stats.pairs_removed, 1);
    assert!(!sink.messages.borrow().is_empty());
    filtered
}

#[test]
fn pipeline_writes_reproducible_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let filtered = prepare_filtered_pairs(dir.path());
    let app = app();
    let sink = RecordingSink::default();

    let first_dir = dir.path().join("run1");
    let second_dir = dir.path().join("run2");
    let first = app
        .sample(
            SampleRequest {
                pairs: &filtered,
                out_dir: &first_dir,
                overrides: overrides(),
                universe: None,
                out_hosts: None,
            },
            &sink,
        )
        .unwrap();
    let second = app
        .sample(
            SampleRequest {
                pairs: &filtered,
                out_dir: &second_dir,
                overrides: overrides(),
                universe: None,
                out_hosts: None,
            },
            &sink,
        )
        .unwrap();

    assert!(first.dataset_path.ends_with("balanced_hosts3_maxpos2_neg1_seed7.csv"));
    assert_eq!(first.stats.positives, 6);
    assert_eq!(first.stats.negatives, 6);

    let first_bytes = fs::read(&first.dataset_path).unwrap();
    let second_bytes = fs::read(&second.dataset_path).unwrap();
    assert_eq!(first_bytes, second_bytes);

    let content = String::from_utf8(first_bytes).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("host_accession,phage_id,label"));
    assert_eq!(lines.count(), 12);
    assert!(!content.contains("PH9.1"));

    let sidecar = provenance_path(Path::new(&first.dataset_path)).unwrap();
    let provenance: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(provenance["stage"], "sample");
    assert_eq!(provenance["rows"], 12);
    assert_eq!(provenance["parameters"]["seed"], 7);
}

#[test]
fn sample_with_universe_and_host_list() {
    let dir = tempfile::tempdir().unwrap();
    let pairs = dir.path().join("pairs.tsv");
    let universe = dir.path().join("universe.txt");
    let hosts = dir.path().join("sampled_hosts.txt");
    fs::write(
        &pairs,
        "host_accession\tphage_id\tlabel\n\
         GCA_000000001.1\tPH1.1\t1\n\
         GCA_000000002.1\tPH2.1\t1\n\
         GCA_000000002.1\tPH7.1\t1\n",
    )
    .unwrap();
    fs::write(&universe, "PH1.1\nPH2.1\nPH3.1\nPH4.1\n").unwrap();

    let result = app()
        .sample(
            SampleRequest {
                pairs: &pairs,
                out_dir: dir.path(),
                overrides: SampleOverrides {
                    num_hosts: Some(2),
                    neg_per_pos: Some(2),
                    ..SampleOverrides::default()
                },
                universe: Some(&universe),
                out_hosts: Some(&hosts),
            },
            &RecordingSink::default(),
        )
        .unwrap();
    assert_eq!(result.input_pairs, 3);
    assert_eq!(result.dropped_outside_universe, 1);
    assert_eq!(result.stats.positives, 2);
    assert_eq!(result.stats.negatives, 4);
    assert_eq!(
        fs::read_to_string(&hosts).unwrap(),
        "GCA_000000001.1\nGCA_000000002.1\n"
    );
}

#[test]
fn host_list_leaves_out_skipped_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let pairs = dir.path().join("pairs.tsv");
    let hosts = dir.path().join("sampled_hosts.txt");
    fs::write(
        &pairs,
        "host_accession\tphage_id\tlabel\n\
         GCA_000000001.1\tPH1.1\t1\n\
         GCA_000000002.1\tPH1.1\t1\n\
         GCA_000000002.1\tPH2.1\t1\n",
    )
    .unwrap();

    let result = app()
        .sample(
            SampleRequest {
                pairs: &pairs,
                out_dir: dir.path(),
                overrides: SampleOverrides {
                    num_hosts: Some(2),
                    on_exhausted: Some(ExhaustionPolicy::SkipHost),
                    ..SampleOverrides::default()
                },
                universe: None,
                out_hosts: Some(&hosts),
            },
            &RecordingSink::default(),
        )
        .unwrap();
    assert_eq!(result.skipped_hosts, vec!["GCA_000000002.1".to_string()]);
    assert_eq!(fs::read_to_string(&hosts).unwrap(), "GCA_000000001.1\n");

    let dataset = fs::read_to_string(&result.dataset_path).unwrap();
    assert!(!dataset.contains("GCA_000000002.1"));
}

#[test]
fn too_many_hosts_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let filtered = prepare_filtered_pairs(dir.path());
    let out_dir = dir.path().join("out");
    let err = app()
        .sample(
            SampleRequest {
                pairs: &filtered,
                out_dir: &out_dir,
                overrides: SampleOverrides {
                    num_hosts: Some(4),
                    ..SampleOverrides::default()
                },
                universe: None,
                out_hosts: None,
            },
            &RecordingSink::default(),
        )
        .unwrap_err();
    assert_matches!(
        err,
        PrepError::InsufficientHosts {
            requested: 4,
            available: 3
        }
    );
    assert!(!out_dir.exists());
}

#[test]
fn map_writes_matches_and_reports_unmatched() {
    let dir = tempfile::tempdir().unwrap();
    let strains = dir.path().join("strains.txt");
    let reference = dir.path().join("reference.tsv");
    fs::write(&strains, "ECOR48\nNOT_A_STRAIN\n").unwrap();
    fs::write(
        &reference,
        "strain_name\taccession\nECOR48\tGCA_000000048.1\n",
    )
    .unwrap();

    let out_map = dir.path().join("strain_map.tsv");
    let out_accessions = dir.path().join("accessions.txt");
    let out_unmatched = dir.path().join("unmatched.txt");
    let out_details = dir.path().join("strain_matches.tsv");
    let result = app()
        .map(
            MapRequest {
                strains: StrainSource::List(&strains),
                reference: &reference,
                out_map: &out_map,
                out_accessions: &out_accessions,
                out_unmatched: Some(&out_unmatched),
                out_details: Some(&out_details),
            },
            &RecordingSink::default(),
        )
        .unwrap();

    assert_eq!(result.stats.matched, 1);
    assert_eq!(result.unmatched, vec!["NOT_A_STRAIN".to_string()]);
    assert_eq!(
        fs::read_to_string(&out_map).unwrap(),
        "strain_name\taccession\nECOR48\tGCA_000000048.1\n"
    );
    assert_eq!(
        fs::read_to_string(&out_accessions).unwrap(),
        "GCA_000000048.1\n"
    );
    assert_eq!(
        fs::read_to_string(&out_unmatched).unwrap(),
        "NOT_A_STRAIN\n"
    );
    assert_eq!(
        fs::read_to_string(&out_details).unwrap(),
        "strain_name\taccession\tmatch_kind\treference_name\n\
         ECOR48\tGCA_000000048.1\texact\tECOR48\n"
    );

    let sidecar = provenance_path(&out_map).unwrap();
    let provenance: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(provenance["parameters"]["exact"], 1);
    assert_eq!(provenance["parameters"]["unmatched"], 1);
}
