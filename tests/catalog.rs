mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_wellframe::concerns::{Concern, write_snapshot};
use kira_wellframe::domain::{Generation, RunId, RunRef, Severity};
use kira_wellframe::error::KiraError;
use kira_wellframe::source::{Catalog, RecordingSource};

fn write_json<T: serde::Serialize>(path: &Utf8PathBuf, value: &T) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

#[test]
fn open_dir_reads_runs_batteries_and_audio() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    write_json(
        &root.join("runs/r1.json"),
        &common::recording(1, Generation::Pointgrey, "cd(10)", 3),
    );
    write_json(&root.join("batteries/standard.json"), &common::battery());
    write_json(&root.join("audio/tone.json"), &common::waveform());
    std::fs::write(root.join("runs/notes.txt"), "ignored").unwrap();

    let catalog = Catalog::open_dir(&root).unwrap();
    let runs = catalog.fetch_runs(&[RunRef::Id(RunId(1))]).unwrap();
    assert_eq!(runs[0].name, "plate-1");

    let traces = catalog.traces(RunId(1), "cd(10)").unwrap();
    assert_eq!(traces.len(), 3);
    assert!(traces[0].1[common::FRAMES - 1].is_nan());
    assert_eq!(catalog.battery(1).unwrap().assays.len(), 2);
    assert_eq!(catalog.audio_waveform(7).unwrap().samples, vec![0.5, -0.25]);
}

#[test]
fn batteries_without_a_sample_rate_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let mut battery = common::battery();
    battery.stimframes.sample_rate_hz = 0;
    write_json(&root.join("batteries/broken.json"), &battery);

    assert_matches!(
        Catalog::open_dir(&root),
        Err(KiraError::InvalidSampleRate(_))
    );
}

#[test]
fn unknown_runs_and_sensors_are_not_found() {
    let catalog = common::pointgrey_catalog(1);
    assert_matches!(
        catalog.fetch_runs(&[RunRef::Tag("missing".to_string())]),
        Err(KiraError::RunNotFound(_))
    );
    assert_matches!(
        catalog.sensor_trace(RunId(1), "barometer"),
        Err(KiraError::SensorNotFound { .. })
    );
}

#[test]
fn snapshot_is_overwritten_not_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("concerns.csv")).unwrap();
    let concern = |run| Concern::new(RunId(run), Severity::Caution, "dead-wells", "x".to_string());

    write_snapshot(&path, &[concern(1), concern(2)]).unwrap();
    write_snapshot(&path, &[concern(1), concern(2), concern(3)]).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 4);
}
