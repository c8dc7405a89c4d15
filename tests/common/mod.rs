#![allow(dead_code)]

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use kira_wellframe::config::QuickSettings;
use kira_wellframe::domain::{ControlType, Generation, RunId};
use kira_wellframe::query::RunRecord;
use kira_wellframe::quick::{Caches, Quick};
use kira_wellframe::source::{Catalog, RunRecording, SensorTrace, VideoBlob, WellRecord};
use kira_wellframe::stim::{Assay, Battery, StimChannel, StimFrame, Waveform};
use kira_wellframe::store::Store;

pub const FRAMES: usize = 20;
pub const FPS: u32 = 10;

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
}

pub fn record(id: u64) -> RunRecord {
    RunRecord {
        id: RunId(id),
        name: format!("plate-{id}"),
        tag: Some(format!("tag{id}")),
        submission: None,
        experiment: if id % 2 == 0 { "even" } else { "odd" }.to_string(),
        project: "screen".to_string(),
        project_type: None,
        battery_id: 1,
        battery_name: "standard".to_string(),
        station: 1,
        user: "kira".to_string(),
        plate: id as u32,
        datetime_run: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::days(id as i64),
    }
}

pub fn wells() -> Vec<WellRecord> {
    vec![
        WellRecord {
            well_index: 1,
            well_label: "A01".to_string(),
            compound: None,
            dose_um: None,
            control: Some(ControlType {
                name: "solvent (-)".to_string(),
                positive: false,
            }),
            pack: None,
        },
        WellRecord {
            well_index: 2,
            well_label: "A02".to_string(),
            compound: Some("aspirin".to_string()),
            dose_um: Some(10.0),
            control: None,
            pack: Some("p1".to_string()),
        },
        WellRecord {
            well_index: 3,
            well_label: "A03".to_string(),
            compound: None,
            dose_um: None,
            control: Some(ControlType {
                name: "ignore".to_string(),
                positive: false,
            }),
            pack: None,
        },
    ]
}

/// Three wells with a steady signal on `feature`; the last `missing` frames are absent.
pub fn recording(id: u64, generation: Generation, feature: &str, missing: usize) -> RunRecording {
    let traces = wells()
        .iter()
        .map(|well| {
            let values = (0..FRAMES)
                .map(|i| (i < FRAMES - missing).then(|| 1.0 + f64::from(well.well_index) + i as f64))
                .collect();
            (well.well_index, values)
        })
        .collect();
    RunRecording {
        record: record(id),
        generation,
        frames_per_second: FPS,
        wells: wells(),
        features: BTreeMap::from([(feature.to_string(), traces)]),
        sensors: vec![SensorTrace {
            run: RunId(id),
            sensor: "thermometer".to_string(),
            sample_rate_hz: 1,
            values: vec![24.5, 24.6],
        }],
        video: Some(VideoBlob {
            run: RunId(id),
            codec: "h265".to_string(),
            bytes: vec![0, 1, 2, 3],
        }),
    }
}

pub fn battery() -> Battery {
    Battery {
        id: 1,
        name: "standard".to_string(),
        legacy: false,
        assays: vec![
            Assay {
                name: "dark".to_string(),
                start_ms: 0,
                end_ms: 1000,
            },
            Assay {
                name: "light".to_string(),
                start_ms: 1000,
                end_ms: 2000,
            },
        ],
        stimframes: StimFrame {
            battery_id: 1,
            sample_rate_hz: 1000,
            start_sample: 0,
            channels: vec![
                StimChannel {
                    name: "blue".to_string(),
                    audio_file: None,
                    values: [vec![0.0; 1000], vec![255.0; 1000]].concat(),
                },
                StimChannel {
                    name: "tone".to_string(),
                    audio_file: Some(7),
                    values: [vec![0.0; 1500], vec![1.0; 500]].concat(),
                },
            ],
        },
    }
}

pub fn waveform() -> Waveform {
    Waveform {
        audio_file: 7,
        sample_rate_hz: 1000,
        samples: vec![0.5, -0.25],
    }
}

/// `runs` Pointgrey runs with the interpolated cd(10) feature.
pub fn pointgrey_catalog(runs: u64) -> Catalog {
    let mut catalog = Catalog::new();
    for id in 1..=runs {
        catalog.insert_run(recording(id, Generation::Pointgrey, "cd(10)", 0));
    }
    catalog.insert_battery(battery());
    catalog.insert_waveform(waveform());
    catalog
}

pub struct Harness {
    pub quick: Quick<Catalog>,
    pub dir: TempDir,
}

impl Harness {
    pub fn cache_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join("cache")).unwrap()
    }

    pub fn path(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(name)).unwrap()
    }
}

pub fn harness(settings: QuickSettings, catalog: Catalog) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).unwrap();
    let quick = Quick::new(settings, catalog, Caches::new(Store::new_with_root(root)));
    Harness { quick, dir }
}
