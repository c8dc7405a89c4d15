use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::domain::Feature;
use crate::error::KiraError;
use crate::frame::{WellFrame, WellMeta, WellRow};
use crate::namer::NamingPolicy;
use crate::query::RunRecord;
use crate::source::RecordingSource;

/// Materializes a [`WellFrame`] from raw recordings.
pub struct FrameBuilder<'a, S: RecordingSource + ?Sized> {
    source: &'a S,
    feature: Feature,
    namer: NamingPolicy,
}

impl<'a, S: RecordingSource + ?Sized> FrameBuilder<'a, S> {
    pub fn new(source: &'a S, feature: Feature) -> Self {
        Self {
            source,
            feature,
            namer: NamingPolicy::default(),
        }
    }

    pub fn with_namer(mut self, namer: NamingPolicy) -> Self {
        self.namer = namer;
        self
    }

    /// One row per well of every run, padded to a common width and standard-sorted.
    pub fn build(&self, runs: &[RunRecord]) -> Result<WellFrame, KiraError> {
        self.check_features(runs)?;
        let mut rows = Vec::new();
        for run in runs {
            let fps = self.source.frame_rate_of(run.id)?;
            let generation = self.source.generation_of(run.id)?;
            let mut traces: BTreeMap<u16, Vec<f64>> = self
                .source
                .traces(run.id, &self.feature.internal_name)?
                .into_iter()
                .collect();
            for well in self.source.wells(run.id)? {
                let values = traces.remove(&well.well_index).unwrap_or_else(|| {
                    warn!(run = %run.id, well = %well.well_label, "no trace for well");
                    Vec::new()
                });
                let mut meta = WellMeta {
                    run: run.id,
                    well_index: well.well_index,
                    well_label: well.well_label,
                    compound: well.compound,
                    dose_um: well.dose_um,
                    control: well.control,
                    pack: well.pack,
                    battery_id: run.battery_id,
                    generation,
                    frames_per_second: fps,
                    name: String::new(),
                    display_name: String::new(),
                    size: 1,
                };
                meta.name = self.namer.name(&meta);
                meta.display_name = meta.name.clone();
                rows.push(WellRow { meta, values });
            }
        }
        let frame = WellFrame::padded(rows).sort_standard();
        debug!(
            rows = frame.len(),
            columns = frame.width(),
            feature = %self.feature,
            "built well frame from raw recordings"
        );
        Ok(frame)
    }

    fn check_features(&self, runs: &[RunRecord]) -> Result<(), KiraError> {
        let mut missing = Vec::new();
        for run in runs {
            let defined = self.source.features_on(run.id)?;
            if !defined.contains(&self.feature.internal_name) {
                missing.push((run.id, defined));
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let ids = missing
            .iter()
            .map(|(run, _)| run.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let defined = missing
            .iter()
            .map(|(run, features)| {
                let names = if features.is_empty() {
                    "(none)".to_string()
                } else {
                    features.iter().cloned().collect::<Vec<_>>().join(", ")
                };
                format!("{run}: {names}")
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(KiraError::NoFeatures(format!(
            "The feature {} is not defined on runs {ids}. These are: [{defined}]",
            self.feature
        )))
    }
}
