mod support;

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use flightlabel::active::{ActiveLearner, LearnerError, LearnerState};
use flightlabel::config::{self, SessionConfig};
use flightlabel::dataset::reroot_identifier;
use flightlabel::session::Session;
use support::fixtures::{clustered_rows, write_feature_table, write_flight_file, write_label_file};
use support::flightlabel_env::FlightlabelEnvGuard;
use tempfile::TempDir;

struct Workspace {
    _env: FlightlabelEnvGuard,
    temp: TempDir,
    data_dir: PathBuf,
    config: SessionConfig,
}

impl Workspace {
    /// Feature table with three groups of `per_group` flights and a saved config.
    fn new(per_group: usize) -> Self {
        let temp = tempfile::tempdir().expect("create tempdir");
        let env = FlightlabelEnvGuard::set_config_home(temp.path().join("config"));
        let data_dir = temp.path().join("data");
        let feature_file = temp.path().join("features.csv");
        write_feature_table(&feature_file, &clustered_rows(per_group));

        let config = SessionConfig {
            labels: vec![
                "Pattern Work".to_string(),
                "Local Maneuvers".to_string(),
                "Cross-Country".to_string(),
            ],
            feature_file,
            data_dir: data_dir.clone(),
            batch_size: 6,
            validation_file: Some(temp.path().join("validation.csv")),
            ..SessionConfig::default()
        };
        let path = config::config_path().expect("config path");
        config::save_to_path(&config, &path).expect("save config");
        Self {
            _env: env,
            temp,
            data_dir,
            config,
        }
    }

    fn flight(&self, group: usize, idx: usize) -> String {
        reroot_identifier(&self.data_dir, &format!("g{group}_flight{idx:02}.csv"))
    }

    fn learner(&self) -> ActiveLearner {
        let config = config::load_or_default().expect("load config");
        assert_eq!(config, self.config);
        ActiveLearner::from_config(&config).expect("build learner")
    }
}

/// Answer every offered flight with its true group.
fn oracle(identifier: &str) -> usize {
    let name = Path::new(identifier)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    name[1..2].parse().expect("group digit")
}

#[test]
fn labeling_loop_grows_ledger_without_repeats() {
    let workspace = Workspace::new(10);
    let mut learner = workspace.learner();
    assert_eq!(learner.store().len(), 30);
    assert!(learner.store().identifiers().all(|id| id.starts_with(workspace.data_dir.to_str().unwrap())));

    let centroids = learner.seed_centroids().expect("centroids");
    assert_eq!(centroids.len(), 3);
    for (class, centroid) in centroids.iter().enumerate() {
        assert_eq!(oracle(centroid), class);
    }
    learner
        .label_flights(centroids.iter().map(|id| (id.clone(), oracle(id))))
        .expect("label centroids");
    assert_eq!(learner.state(), LearnerState::Seeded);

    let mut offered = HashSet::new();
    for round in 0..3 {
        let batch = learner.select_batch().expect("select batch");
        assert_eq!(batch.len(), 6, "round {round}");
        for id in &batch {
            assert!(!learner.ledger().contains(id));
            assert!(offered.insert(id.clone()), "{id} offered twice");
        }
        learner
            .label_flights(batch.iter().map(|id| (id.clone(), oracle(id))))
            .expect("label batch");
    }
    assert_eq!(learner.state(), LearnerState::Active);
    assert_eq!(learner.ledger().len(), 21);

    let last = learner.select_batch().expect("final batch");
    assert_eq!(last.len(), 6);
    assert_eq!(learner.select_batch_of(100).expect("rest").len(), 9);
    assert_eq!(learner.label_distribution().expect("distribution"), vec![10, 10, 10]);
}

#[test]
fn validation_rows_leave_the_working_set() {
    let workspace = Workspace::new(8);
    let validation = workspace.config.validation_path().expect("validation path");
    let held_out = [workspace.flight(0, 7), workspace.flight(1, 7), workspace.flight(2, 7)];
    write_label_file(
        &validation,
        &[
            (Path::new(&held_out[0]), "Pattern Work"),
            (Path::new(&held_out[1]), "Local Maneuvers"),
            (Path::new(&held_out[2]), "Cross-Country"),
            (Path::new("/elsewhere/unknown.csv"), "Pattern Work"),
        ],
    );

    let mut learner = workspace.learner();
    assert!(learner.load_validation(&validation));
    assert_eq!(learner.store().len(), 21);
    for id in &held_out {
        assert!(!learner.store().contains(id));
    }

    learner
        .label_flights([
            (workspace.flight(0, 0), 0),
            (workspace.flight(1, 0), 1),
            (workspace.flight(2, 0), 2),
        ])
        .expect("label");
    let (ids, names) = learner.labeled_test_snapshot(true, true).expect("snapshot");
    assert_eq!(ids.len(), 18);
    assert!(ids.iter().all(|id| !held_out.contains(id)));
    for (id, name) in ids.iter().zip(&names) {
        assert_eq!(learner.labels().index_of(name), Some(oracle(id)));
    }
    let report = learner.last_validation().expect("validation report");
    assert_eq!(report.matrix.total(), 3);
    assert_eq!(report.accuracy, 1.0);
}

#[test]
fn missing_validation_file_is_silently_skipped() {
    let workspace = Workspace::new(4);
    let mut learner = workspace.learner();
    assert!(!learner.load_validation(&workspace.temp.path().join("validation.csv")));
    assert!(learner.validation().is_none());
    assert_eq!(learner.store().len(), 12);
}

#[test]
fn label_import_renumbers_labels_from_file() {
    let workspace = Workspace::new(4);
    let saved = workspace.temp.path().join("labels.csv");
    let mut learner = workspace.learner();
    learner
        .label_flights([(workspace.flight(2, 0), 2), (workspace.flight(0, 1), 0)])
        .expect("label");
    learner.save_labels(&saved).expect("save");
    let before = learner.labeled_training_snapshot().expect("snapshot");

    let mut other = workspace.learner();
    assert!(other.load_labels(&saved));
    assert_eq!(other.labeled_training_snapshot().expect("snapshot"), before);
    // Only the names present in the file survive, in first-seen order.
    assert_eq!(other.labels().names(), ["Pattern Work", "Cross-Country"]);
    assert_eq!(other.ledger().get(&workspace.flight(2, 0)), Some(1));

    other.restart();
    assert!(matches!(other.train(), Err(LearnerError::EmptyTrainingSet)));
}

#[test]
fn malformed_feature_table_fails_construction() {
    let workspace = Workspace::new(2);
    std::fs::write(&workspace.config.feature_file, "a,label,filename\nx,0,f.csv\n").unwrap();
    let err = ActiveLearner::from_config(&workspace.config).unwrap_err();
    assert!(matches!(err, LearnerError::DataLoad(_)));
}

#[test]
fn session_drives_the_learner_end_to_end() {
    let workspace = Workspace::new(5);
    write_flight_file(Path::new(&workspace.flight(0, 2)), 2, 4);
    let saved = workspace.temp.path().join("round1");
    let script = format!(
        "labels\nstart\n0\n1\n2\nmore\n0\n0\n1\n1\n2\n2\nshow {}\nsave {}\nclusters\nquit\n",
        workspace.flight(0, 2),
        saved.display()
    );
    let mut output = Vec::new();
    let mut session = Session::new(workspace.learner(), Cursor::new(script), &mut output);
    session.run().expect("session");
    let learner = session.into_learner();
    let output = String::from_utf8(output).expect("utf8 output");

    assert_eq!(learner.ledger().len(), 9);
    assert!(output.contains("4 points, AltGPS 1000.0000 .. 1030.0000"));
    assert!(output.contains("Saved 9 labels"));
    assert!(saved.with_extension("csv").is_file());
    assert!(output.contains("Cross-Country ("));
}
