use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::agg::AggType;
use crate::builder::FrameBuilder;
use crate::cache::{AudioCache, Loaded, SensorCache, StimCache, VideoCache, WellCache};
use crate::checks::{RuleBattery, check_generations};
use crate::concerns::{self, CapturedFailure, Concern, ScanOutcome};
use crate::config::QuickSettings;
use crate::domain::{RunId, RunRef, Severity, TimeWindow};
use crate::error::KiraError;
use crate::frame::WellFrame;
use crate::identifier::{Identifier, Resolution};
use crate::namer::NamingPolicy;
use crate::query::RunRecord;
use crate::repair::Repairer;
use crate::source::{RecordingSource, SensorTrace, VideoBlob};
use crate::stim::{AssayFrame, StimFrame, Waveform};
use crate::store::Store;

/// Batch concern scans rewrite their snapshot after this many runs.
pub const SNAPSHOT_EVERY: usize = 10;

/// Every derived-artifact cache a [`Quick`] reads through.
#[derive(Debug, Clone)]
pub struct Caches {
    pub well: Option<WellCache>,
    pub stim: StimCache,
    pub sensor: SensorCache,
    pub audio: AudioCache,
    pub video: VideoCache,
}

impl Caches {
    pub fn new(store: Store) -> Self {
        Self {
            well: Some(WellCache::new(store.clone())),
            stim: StimCache::new(store.clone()),
            sensor: SensorCache::new(store.clone()),
            audio: AudioCache::new(store.clone()),
            video: VideoCache::new(store),
        }
    }

    /// Always build well frames from raw recordings.
    pub fn without_well_cache(mut self) -> Self {
        self.well = None;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameOrigin {
    Fresh,
    Cached,
    PassThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub frame: WellFrame,
    pub origin: FrameOrigin,
}

/// Options for a single fetch beyond the identifier.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub window: TimeWindow,
    /// Overrides the configured namer; also forces renaming of materialized tables.
    pub namer: Option<NamingPolicy>,
    pub agg: AggType,
}

impl FetchRequest {
    pub fn window(window: TimeWindow) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }
}

enum Fetched {
    Fresh(WellFrame),
    Cached(WellFrame),
    PassThrough(WellFrame),
}

/// Resolves identifiers into validated, repaired well frames.
#[derive(Clone)]
pub struct Quick<S: RecordingSource> {
    settings: QuickSettings,
    source: S,
    caches: Caches,
    rules: Arc<RuleBattery>,
}

impl<S: RecordingSource> Quick<S> {
    pub fn new(settings: QuickSettings, source: S, caches: Caches) -> Self {
        Self {
            settings,
            source,
            caches,
            rules: Arc::new(RuleBattery::standard()),
        }
    }

    pub fn with_rules(mut self, rules: RuleBattery) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn settings(&self) -> &QuickSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// A copy running under different settings.
    pub fn using(&self, settings: QuickSettings) -> Self
    where
        S: Clone,
    {
        Self {
            settings,
            ..self.clone()
        }
    }

    pub fn fetch(
        &self,
        identifier: impl Into<Identifier>,
        window: Option<TimeWindow>,
    ) -> Result<WellFrame, KiraError> {
        let request = FetchRequest::window(window.unwrap_or_default());
        Ok(self.fetch_with(identifier, &request)?.frame)
    }

    /// Fresh frames are checked, sliced and repaired; cached and materialized
    /// frames are only sliced. Naming, ordering and aggregation apply to all.
    pub fn fetch_with(
        &self,
        identifier: impl Into<Identifier>,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, KiraError> {
        self.fetch_under(&self.settings, identifier.into(), request)
    }

    fn fetch_under(
        &self,
        settings: &QuickSettings,
        identifier: Identifier,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, KiraError> {
        let (frame, origin) = match self.load(settings, identifier)? {
            Fetched::Fresh(frame) => {
                if settings.enable_checks {
                    let found = self.rules.of(&frame, settings.min_log_severity);
                    concerns::log_concerns(&found, settings.min_log_severity);
                }
                let sliced = frame.slice_ms(request.window)?;
                let frame = if settings.auto_fix {
                    self.fix_under(settings, sliced)?
                } else {
                    sliced
                };
                (frame, FrameOrigin::Fresh)
            }
            Fetched::Cached(frame) => {
                // The entry may have been built under another expected generation.
                check_generations(&frame, settings.generation)?;
                (frame.slice_ms(request.window)?, FrameOrigin::Cached)
            }
            Fetched::PassThrough(frame) => {
                (frame.slice_ms(request.window)?, FrameOrigin::PassThrough)
            }
        };

        let frame = match (origin, request.namer) {
            (FrameOrigin::PassThrough, None) => frame,
            (_, namer) => frame.with_names(namer.unwrap_or(settings.well_namer)),
        };
        let frame = match origin {
            FrameOrigin::PassThrough => frame,
            _ => frame.sort_standard(),
        };
        let frame = request.agg.agg(&frame);
        Ok(FetchOutcome { frame, origin })
    }

    fn load(&self, settings: &QuickSettings, identifier: Identifier) -> Result<Fetched, KiraError> {
        let (runs, described) = match identifier.resolve(settings.as_of)? {
            Resolution::PassThrough(frame) => return Ok(Fetched::PassThrough(frame)),
            Resolution::Runs(refs) => (self.source.fetch_runs(&refs)?, describe(&refs)),
            Resolution::Query { wheres, as_of } => (
                self.source.query_runs(&wheres, as_of)?,
                format!("{} as of {as_of}", describe(&wheres)),
            ),
        };
        if runs.is_empty() {
            return Err(KiraError::NoRuns(described));
        }
        let ids: Vec<RunId> = runs.iter().map(|run| run.id).collect();
        let builder = FrameBuilder::new(&self.source, settings.feature.clone())
            .with_namer(settings.well_namer);
        // Only frames that pass the generation check are ever stored.
        let build = || -> Result<WellFrame, KiraError> {
            let frame = builder.build(&runs)?;
            check_generations(&frame, settings.generation)?;
            Ok(frame)
        };
        let loaded = match &self.caches.well {
            Some(cache) => cache.load(&ids, &settings.feature, build)?,
            None => Loaded::Fresh(build()?),
        };
        Ok(match loaded {
            Loaded::Fresh(frame) => Fetched::Fresh(frame),
            Loaded::Cached(frame) => Fetched::Cached(frame),
        })
    }

    /// Fails on mixed or unexpected generations.
    pub fn errors(&self, frame: &WellFrame) -> Result<(), KiraError> {
        check_generations(frame, self.settings.generation)
    }

    /// Logs findings at or above `min_severity`.
    pub fn log_concerns(&self, frame: &WellFrame, min_severity: Severity) {
        concerns::log_concerns(&self.rules.of(frame, min_severity), min_severity);
    }

    pub fn concerns(&self, frame: &WellFrame, min_severity: Severity) -> Vec<Concern> {
        self.rules.of(frame, min_severity)
    }

    /// Applies repairs as configured.
    pub fn fix(&self, frame: WellFrame) -> Result<WellFrame, KiraError> {
        self.fix_under(&self.settings, frame)
    }

    fn fix_under(&self, settings: &QuickSettings, frame: WellFrame) -> Result<WellFrame, KiraError> {
        let repairer = Repairer::new(
            &settings.feature,
            settings.generation,
            &settings.discard_controls,
        );
        let mut assays = BTreeMap::new();
        if repairer.completes_zero_gaps() {
            for battery_id in frame.unique_batteries() {
                assays.insert(battery_id, self.assays(battery_id)?);
            }
        }
        let (frame, report) = repairer.repair(frame, &assays);
        debug!(?report, "repaired fresh frame");
        Ok(frame)
    }

    /// Resolves any identifier to joined run records.
    pub fn query_runs(&self, identifier: impl Into<Identifier>) -> Result<Vec<RunRecord>, KiraError> {
        self.query_runs_under(&self.settings, identifier.into())
    }

    fn query_runs_under(
        &self,
        settings: &QuickSettings,
        identifier: Identifier,
    ) -> Result<Vec<RunRecord>, KiraError> {
        match identifier.resolve(settings.as_of)? {
            Resolution::Runs(refs) => self.source.fetch_runs(&refs),
            Resolution::Query { wheres, as_of } => self.source.query_runs(&wheres, as_of),
            Resolution::PassThrough(frame) => {
                let refs: Vec<RunRef> = frame.unique_runs().into_iter().map(RunRef::Id).collect();
                self.source.fetch_runs(&refs)
            }
        }
    }

    /// Scans every run in `batch`, turning per-run fetch failures into critical concerns.
    ///
    /// When `snapshot` is set the full table is rewritten there every
    /// [`SNAPSHOT_EVERY`] runs and once more at the end.
    pub fn list_concerns(
        &self,
        batch: impl Into<Identifier>,
        min_severity: Severity,
        snapshot: Option<&Utf8Path>,
    ) -> Result<Vec<Concern>, KiraError> {
        let scan = self
            .settings
            .using()
            .enable_checks(false)
            .auto_fix(false)
            .as_of(Some(self.settings.as_of.unwrap_or_else(Utc::now)))
            .build();
        let runs = self.query_runs_under(&scan, batch.into())?;
        info!("Scanning {} runs for concerns", runs.len());

        let mut found = Vec::new();
        for (i, run) in runs.iter().enumerate() {
            let outcome: ScanOutcome = self
                .fetch_under(&scan, RunRef::Id(run.id).into(), &FetchRequest::default())
                .map(|fetched| self.rules.of(&fetched.frame, min_severity))
                .map_err(|err| CapturedFailure::capture(&err));
            match outcome {
                Ok(concerns) => found.extend(concerns),
                Err(failure) => found.push(Concern::from_failure(run.id, failure)),
            }
            if (i + 1) % SNAPSHOT_EVERY == 0
                && let Some(path) = snapshot
            {
                concerns::write_snapshot(path, &found)?;
                debug!("wrote concern snapshot after {} runs to {path}", i + 1);
            }
        }
        if let Some(path) = snapshot {
            concerns::write_snapshot(path, &found)?;
        }
        Ok(found)
    }

    /// Removes cached well frames, sensor traces and videos touching any resolved run.
    pub fn invalidate(&self, identifier: impl Into<Identifier>) -> Result<usize, KiraError> {
        let runs = self.query_runs(identifier)?;
        let ids: Vec<RunId> = runs.iter().map(|run| run.id).collect();
        let mut removed = 0;
        if let Some(cache) = &self.caches.well {
            removed += cache.delete_runs(&ids)?;
        }
        removed += self.caches.sensor.delete_runs(&ids)?;
        removed += self.caches.video.delete_runs(&ids)?;
        info!("Deleted {} run(s) from the caches", ids.len());
        Ok(removed)
    }

    /// Stimulus timeline for a battery; `audio_waveform` defaults to on for non-legacy batteries.
    pub fn stimframes(
        &self,
        battery_id: u32,
        window: TimeWindow,
        audio_waveform: Option<bool>,
    ) -> Result<StimFrame, KiraError> {
        let battery = self.source.battery(battery_id)?;
        let expanded = audio_waveform.unwrap_or(!battery.legacy);
        let stimframes = self
            .caches
            .stim
            .load(battery_id, expanded, || {
                if expanded {
                    battery
                        .stimframes
                        .with_audio_waveforms(|audio_file| self.audio(audio_file))
                } else {
                    Ok(battery.stimframes.clone())
                }
            })?
            .into_inner();
        Ok(stimframes.slice_ms(window))
    }

    pub fn assays(&self, battery_id: u32) -> Result<AssayFrame, KiraError> {
        Ok(self.source.battery(battery_id)?.assay_frame())
    }

    pub fn sensor(&self, run: RunId, sensor: &str) -> Result<SensorTrace, KiraError> {
        Ok(self
            .caches
            .sensor
            .load(run, sensor, || self.source.sensor_trace(run, sensor))?
            .into_inner())
    }

    pub fn audio(&self, audio_file: u32) -> Result<Waveform, KiraError> {
        Ok(self
            .caches
            .audio
            .load(audio_file, || self.source.audio_waveform(audio_file))?
            .into_inner())
    }

    pub fn video(&self, run: RunId) -> Result<VideoBlob, KiraError> {
        Ok(self
            .caches
            .video
            .load(run, || self.source.video(run))?
            .into_inner())
    }

    /// Names of the wells to treat as controls.
    pub fn control_names(
        &self,
        frame: &WellFrame,
        control_names: Option<&[String]>,
        control_types: Option<&[String]>,
    ) -> Result<Vec<String>, KiraError> {
        match (control_names, control_types) {
            (Some(_), Some(_)) => Err(KiraError::ContradictoryRequest(
                "can't supply both control_names and control_types".to_string(),
            )),
            (Some(names), None) => Ok(names.to_vec()),
            (None, Some(types)) => Ok(frame.with_controls(Some(types)).unique_names()),
            (None, None) => Ok(frame.with_controls(None).unique_names()),
        }
    }

    /// Z-scores of the non-control wells against the chosen controls.
    ///
    /// With neither selector, the frame must hold exactly one negative control type.
    pub fn control_subtract(
        &self,
        frame: &WellFrame,
        control_type: Option<&str>,
        control_name: Option<&str>,
    ) -> Result<WellFrame, KiraError> {
        let (controls, cases) = match (control_type, control_name) {
            (Some(control_type), Some(control_name)) => {
                return Err(KiraError::ContradictoryRequest(format!(
                    "can only use control_type OR control_name; got {control_type} and {control_name}"
                )));
            }
            (None, Some(name)) => (
                frame.with_name(name),
                frame.filter_rows(|row| row.meta.name != name),
            ),
            (Some(control_type), None) => split_control_type(frame, control_type),
            (None, None) => {
                let negatives = frame.unique_controls(Some(false));
                match negatives.as_slice() {
                    [only] => split_control_type(frame, &only.name),
                    _ => {
                        return Err(KiraError::NoSingleControl(format!(
                            "expected exactly one negative control type; found {}",
                            negatives.len()
                        )));
                    }
                }
            }
        };
        if controls.is_empty() {
            return Err(KiraError::NoSingleControl(
                "no wells match the requested control".to_string(),
            ));
        }
        Ok(cases.zscore_against(&controls))
    }
}

fn split_control_type(frame: &WellFrame, control_type: &str) -> (WellFrame, WellFrame) {
    (
        frame.filter_rows(|row| row.meta.control_name() == Some(control_type)),
        frame.filter_rows(|row| row.meta.control_name() != Some(control_type)),
    )
}

fn describe<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
