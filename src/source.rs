use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ControlType, Generation, RunId, RunRef};
use crate::error::KiraError;
use crate::query::{self, Expression, RunRecord};
use crate::stim::{Battery, Waveform};

/// Per-well metadata as recorded, before naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellRecord {
    pub well_index: u16,
    pub well_label: String,
    #[serde(default)]
    pub compound: Option<String>,
    #[serde(default)]
    pub dose_um: Option<f64>,
    #[serde(default)]
    pub control: Option<ControlType>,
    #[serde(default)]
    pub pack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTrace {
    pub run: RunId,
    pub sensor: String,
    pub sample_rate_hz: u32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoBlob {
    pub run: RunId,
    pub codec: String,
    pub bytes: Vec<u8>,
}

/// Where raw recordings come from.
pub trait RecordingSource {
    fn fetch_runs(&self, refs: &[RunRef]) -> Result<Vec<RunRecord>, KiraError>;
    fn query_runs(
        &self,
        wheres: &[Expression],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, KiraError>;
    fn features_on(&self, run: RunId) -> Result<BTreeSet<String>, KiraError>;
    fn frame_rate_of(&self, run: RunId) -> Result<u32, KiraError>;
    fn generation_of(&self, run: RunId) -> Result<Generation, KiraError>;
    fn wells(&self, run: RunId) -> Result<Vec<WellRecord>, KiraError>;
    /// Per-well traces of `feature`; traces may differ in length.
    fn traces(&self, run: RunId, feature: &str) -> Result<Vec<(u16, Vec<f64>)>, KiraError>;
    fn battery(&self, battery_id: u32) -> Result<Battery, KiraError>;
    fn sensor_trace(&self, run: RunId, sensor: &str) -> Result<SensorTrace, KiraError>;
    fn audio_waveform(&self, audio_file: u32) -> Result<Waveform, KiraError>;
    fn video(&self, run: RunId) -> Result<VideoBlob, KiraError>;
}

/// Everything recorded for one run, as stored in a catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecording {
    pub record: RunRecord,
    pub generation: Generation,
    pub frames_per_second: u32,
    pub wells: Vec<WellRecord>,
    /// feature name -> well index -> samples; `null` marks a missing frame.
    #[serde(default)]
    pub features: BTreeMap<String, BTreeMap<u16, Vec<Option<f64>>>>,
    #[serde(default)]
    pub sensors: Vec<SensorTrace>,
    #[serde(default)]
    pub video: Option<VideoBlob>,
}

/// In-memory recording source, optionally loaded from a directory of JSON files.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    runs: BTreeMap<RunId, RunRecording>,
    batteries: BTreeMap<u32, Battery>,
    audio: BTreeMap<u32, Waveform>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `runs/*.json`, `batteries/*.json` and `audio/*.json` under `root`.
    pub fn open_dir(root: &Utf8Path) -> Result<Self, KiraError> {
        let mut catalog = Self::new();
        for recording in read_json_dir::<RunRecording>(&root.join("runs"))? {
            catalog.insert_run(recording);
        }
        for battery in read_json_dir::<Battery>(&root.join("batteries"))? {
            battery.stimframes.check_sample_rate()?;
            catalog.insert_battery(battery);
        }
        for waveform in read_json_dir::<Waveform>(&root.join("audio"))? {
            catalog.insert_waveform(waveform);
        }
        debug!(
            runs = catalog.runs.len(),
            batteries = catalog.batteries.len(),
            "loaded recording catalog from {root}"
        );
        Ok(catalog)
    }

    pub fn insert_run(&mut self, recording: RunRecording) {
        self.runs.insert(recording.record.id, recording);
    }

    pub fn insert_battery(&mut self, battery: Battery) {
        self.batteries.insert(battery.id, battery);
    }

    pub fn insert_waveform(&mut self, waveform: Waveform) {
        self.audio.insert(waveform.audio_file, waveform);
    }

    fn recording(&self, run: RunId) -> Result<&RunRecording, KiraError> {
        self.runs
            .get(&run)
            .ok_or_else(|| KiraError::RunNotFound(run.to_string()))
    }

    fn matching(&self, reference: &RunRef) -> Vec<RunRecord> {
        self.runs
            .values()
            .map(|recording| &recording.record)
            .filter(|record| match reference {
                RunRef::Id(id) => record.id == *id,
                RunRef::Name(name) => &record.name == name,
                RunRef::Tag(tag) => record.tag.as_ref() == Some(tag),
                RunRef::Submission(hash) => record.submission.as_ref() == Some(hash),
            })
            .cloned()
            .collect()
    }
}

impl RecordingSource for Catalog {
    fn fetch_runs(&self, refs: &[RunRef]) -> Result<Vec<RunRecord>, KiraError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for reference in refs {
            let found = self.matching(reference);
            if found.is_empty() {
                return Err(KiraError::RunNotFound(reference.to_string()));
            }
            out.extend(found.into_iter().filter(|record| seen.insert(record.id)));
        }
        Ok(out)
    }

    fn query_runs(
        &self,
        wheres: &[Expression],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, KiraError> {
        Ok(query::select(
            self.runs.values().map(|recording| &recording.record),
            wheres,
            as_of,
        ))
    }

    fn features_on(&self, run: RunId) -> Result<BTreeSet<String>, KiraError> {
        Ok(self.recording(run)?.features.keys().cloned().collect())
    }

    fn frame_rate_of(&self, run: RunId) -> Result<u32, KiraError> {
        Ok(self.recording(run)?.frames_per_second)
    }

    fn generation_of(&self, run: RunId) -> Result<Generation, KiraError> {
        Ok(self.recording(run)?.generation)
    }

    fn wells(&self, run: RunId) -> Result<Vec<WellRecord>, KiraError> {
        Ok(self.recording(run)?.wells.clone())
    }

    fn traces(&self, run: RunId, feature: &str) -> Result<Vec<(u16, Vec<f64>)>, KiraError> {
        let recording = self.recording(run)?;
        let per_well = recording.features.get(feature).ok_or_else(|| {
            KiraError::NoFeatures(format!("The feature {feature} is not defined on run {run}"))
        })?;
        Ok(per_well
            .iter()
            .map(|(well, samples)| {
                let values = samples
                    .iter()
                    .map(|sample| sample.unwrap_or(f64::NAN))
                    .collect();
                (*well, values)
            })
            .collect())
    }

    fn battery(&self, battery_id: u32) -> Result<Battery, KiraError> {
        self.batteries
            .get(&battery_id)
            .cloned()
            .ok_or_else(|| KiraError::BatteryNotFound(battery_id.to_string()))
    }

    fn sensor_trace(&self, run: RunId, sensor: &str) -> Result<SensorTrace, KiraError> {
        self.recording(run)?
            .sensors
            .iter()
            .find(|trace| trace.sensor == sensor)
            .cloned()
            .ok_or_else(|| KiraError::SensorNotFound {
                run: run.to_string(),
                sensor: sensor.to_string(),
            })
    }

    fn audio_waveform(&self, audio_file: u32) -> Result<Waveform, KiraError> {
        self.audio
            .get(&audio_file)
            .cloned()
            .ok_or_else(|| KiraError::AudioNotFound(audio_file.to_string()))
    }

    fn video(&self, run: RunId) -> Result<VideoBlob, KiraError> {
        self.recording(run)?
            .video
            .clone()
            .ok_or_else(|| KiraError::VideoNotFound(run.to_string()))
    }
}

fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Utf8Path) -> Result<Vec<T>, KiraError> {
    if !dir.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for entry in entries {
        let path = entry
            .map_err(|err| KiraError::Filesystem(err.to_string()))?
            .path();
        if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            let content = fs::read_to_string(&path)
                .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
            serde_json::from_str(&content)
                .map_err(|err| KiraError::Filesystem(format!("parse {}: {err}", path.display())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn recording(id: u64, name: &str) -> RunRecording {
        RunRecording {
            record: RunRecord {
                id: RunId(id),
                name: name.to_string(),
                tag: Some(format!("tag{id}")),
                submission: None,
                experiment: "e".to_string(),
                project: "p".to_string(),
                project_type: None,
                battery_id: 1,
                battery_name: "b".to_string(),
                station: 1,
                user: "u".to_string(),
                plate: 1,
                datetime_run: Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap(),
            },
            generation: Generation::PikeMgh,
            frames_per_second: 25,
            wells: Vec::new(),
            features: BTreeMap::from([(
                "MI".to_string(),
                BTreeMap::from([(1, vec![Some(1.0), None])]),
            )]),
            sensors: Vec::new(),
            video: None,
        }
    }

    #[test]
    fn fetch_runs_by_each_reference_kind() {
        let mut catalog = Catalog::new();
        catalog.insert_run(recording(1, "alpha"));
        catalog.insert_run(recording(2, "beta"));

        let found = catalog
            .fetch_runs(&[
                RunRef::Name("beta".to_string()),
                RunRef::Tag("tag1".to_string()),
                RunRef::Id(RunId(2)),
            ])
            .unwrap();
        let ids: Vec<RunId> = found.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![RunId(2), RunId(1)]);
    }

    #[test]
    fn fetch_unknown_run_fails() {
        let catalog = Catalog::new();
        assert_matches!(
            catalog.fetch_runs(&[RunRef::Id(RunId(5))]),
            Err(KiraError::RunNotFound(_))
        );
    }

    #[test]
    fn null_samples_become_nan() {
        let mut catalog = Catalog::new();
        catalog.insert_run(recording(1, "alpha"));
        let traces = catalog.traces(RunId(1), "MI").unwrap();
        assert_eq!(traces[0].1[0], 1.0);
        assert!(traces[0].1[1].is_nan());
        assert_matches!(catalog.traces(RunId(1), "cd(10)"), Err(KiraError::NoFeatures(_)));
    }
}
