use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::domain::{Feature, Generation};
use crate::frame::WellFrame;
use crate::stim::AssayFrame;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub unified_start: usize,
    pub unified_end: usize,
    pub gaps_filled: usize,
    pub discarded: usize,
}

/// Numeric corrections applied to freshly built frames.
pub struct Repairer<'a> {
    feature: &'a Feature,
    generation: Generation,
    discard_controls: &'a BTreeSet<String>,
}

impl<'a> Repairer<'a> {
    pub fn new(
        feature: &'a Feature,
        generation: Generation,
        discard_controls: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            feature,
            generation,
            discard_controls,
        }
    }

    /// Whether the legacy assay-gap repair applies rather than plain boundary unification.
    pub fn repairs_assay_gaps(&self) -> bool {
        self.feature.time_dependent && !self.generation.is_sauronx()
    }

    /// Whether zero-valued assay gaps are interpolated. Only motion index carries them.
    pub fn completes_zero_gaps(&self) -> bool {
        self.repairs_assay_gaps()
            && self.feature.internal_name == Feature::motion_index().internal_name
    }

    /// `assays` maps battery id to its assay segments.
    pub fn repair(
        &self,
        frame: WellFrame,
        assays: &BTreeMap<u32, AssayFrame>,
    ) -> (WellFrame, RepairReport) {
        let mut frame = frame;
        let mut report = RepairReport::default();
        if self.repairs_assay_gaps() {
            self.repair_assay_gaps(&mut frame, assays, &mut report);
        } else {
            report.unified_start = frame.unify_first_nans();
            report.unified_end = frame.unify_last_nans();
            if report.unified_start > 1 || report.unified_end > 1 {
                warn!(
                    "Unified {} {} at the start and {} at the end",
                    report.unified_start,
                    if report.unified_start > 1 { "NaNs" } else { "NaN" },
                    report.unified_end
                );
            }
        }

        let before = frame.len();
        let frame = frame.without_controls(self.discard_controls);
        report.discarded = before - frame.len();
        if report.discarded > 0 {
            warn!("Discarded {} trash controls", report.discarded);
        }
        (frame, report)
    }

    // Legacy hardware wrote 0 at the first frame of each assay after the first.
    // Trailing NaNs are genuine missing frames and must survive the gap fill,
    // so they are masked out before filling and only zeroed afterwards.
    fn repair_assay_gaps(
        &self,
        frame: &mut WellFrame,
        assays: &BTreeMap<u32, AssayFrame>,
        report: &mut RepairReport,
    ) {
        report.unified_end = frame.unify_last_nans();
        let width = frame.width();
        let start_frame = frame.start_frame();
        let mut missing = vec![false; width];
        missing[width - report.unified_end..].fill(true);

        let has_zeros = self.completes_zero_gaps()
            && frame
                .rows()
                .iter()
                .any(|row| row.values.iter().any(|v| *v == 0.0));
        if has_zeros {
            warn!("Trace contains 0s and might have breaks between assays.");
            for row in frame.rows_mut() {
                let Some(assay_frame) = assays.get(&row.meta.battery_id) else {
                    continue;
                };
                for boundary in assay_frame.boundaries(row.meta.frames_per_second) {
                    if boundary < start_frame || boundary >= start_frame + width {
                        continue;
                    }
                    report.gaps_filled +=
                        fill_gap(&mut row.values, boundary - start_frame, &missing);
                }
            }
        }

        for row in frame.rows_mut() {
            for (value, masked) in row.values.iter_mut().zip(&missing) {
                if *masked {
                    *value = f64::NAN;
                }
            }
        }
        if report.unified_end > 0 {
            warn!("Unified {} NaNs at the end", report.unified_end);
        }
        frame.fill_nan(0.0);
    }
}

/// Linearly interpolates the run of 0/NaN starting at `at`, returning how many values changed.
fn fill_gap(values: &mut [f64], at: usize, missing: &[bool]) -> usize {
    let is_gap = |i: usize, v: f64| !missing[i] && (v == 0.0 || v.is_nan());
    if !is_gap(at, values[at]) {
        return 0;
    }
    let mut end = at;
    while end < values.len() && is_gap(end, values[end]) {
        end += 1;
    }
    let usable = |i: usize| !missing[i] && values[i].is_finite();
    let left = (at > 0 && usable(at - 1)).then(|| values[at - 1]);
    let right = (end < values.len() && usable(end)).then(|| values[end]);
    let span = (end - at + 1) as f64;
    let fill = |offset: usize| match (left, right) {
        (Some(l), Some(r)) => Some(l + (r - l) * (offset + 1) as f64 / span),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    };
    let mut changed = 0;
    for (offset, i) in (at..end).enumerate() {
        if let Some(value) = fill(offset) {
            values[i] = value;
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ControlType;
    use crate::frame::WellRow;
    use crate::frame::tests::meta;
    use crate::stim::Assay;

    fn assays() -> BTreeMap<u32, AssayFrame> {
        BTreeMap::from([(
            1,
            AssayFrame {
                battery_id: 1,
                assays: vec![
                    Assay {
                        name: "dark".to_string(),
                        start_ms: 0,
                        end_ms: 500,
                    },
                    Assay {
                        name: "light".to_string(),
                        start_ms: 500,
                        end_ms: 1000,
                    },
                ],
            },
        )])
    }

    fn legacy_frame(rows: Vec<Vec<f64>>) -> WellFrame {
        WellFrame::new(
            rows.into_iter()
                .enumerate()
                .map(|(i, values)| {
                    let mut m = meta(1, i as u16 + 1);
                    m.generation = Generation::PikeLegacy;
                    WellRow { meta: m, values }
                })
                .collect(),
            0,
        )
        .unwrap()
    }

    #[test]
    fn assay_gap_is_interpolated() {
        let feature = Feature::motion_index();
        let discard = BTreeSet::new();
        let repairer = Repairer::new(&feature, Generation::PikeLegacy, &discard);
        assert!(repairer.repairs_assay_gaps());

        let df = legacy_frame(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 7.0, 8.0, 9.0, 10.0]]);
        let (fixed, report) = repairer.repair(df, &assays());
        let value = fixed.rows()[0].values[5];
        assert!(!value.is_nan());
        assert_eq!(value, 6.0);
        assert_eq!(report.gaps_filled, 1);
    }

    #[test]
    fn genuine_trailing_nans_are_not_gap_filled() {
        let feature = Feature::motion_index();
        let discard = BTreeSet::new();
        let repairer = Repairer::new(&feature, Generation::PikeMgh, &discard);
        let nan = f64::NAN;
        let df = legacy_frame(vec![
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, nan, nan],
            vec![2.0, 2.0, 2.0, 2.0, 2.0, 0.0, 2.0, 2.0, 2.0, nan],
        ]);
        let (fixed, report) = repairer.repair(df, &assays());
        assert_eq!(report.unified_end, 2);
        assert_eq!(
            fixed.rows()[1].values,
            vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.0]
        );
        assert_eq!(fixed.rows()[0].values[5], 1.0);
    }

    #[test]
    fn other_time_dependent_features_keep_their_zeros() {
        let feature = Feature::custom("speed", true);
        let discard = BTreeSet::new();
        let repairer = Repairer::new(&feature, Generation::PikeLegacy, &discard);
        assert!(repairer.repairs_assay_gaps());
        assert!(!repairer.completes_zero_gaps());

        let nan = f64::NAN;
        let df = legacy_frame(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 7.0, 8.0, 9.0, nan]]);
        let (fixed, report) = repairer.repair(df, &assays());
        assert_eq!(report.gaps_filled, 0);
        assert_eq!(report.unified_end, 1);
        assert_eq!(
            fixed.rows()[0].values,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn gap_adjacent_to_missing_tail_uses_left_value() {
        let missing = [false, false, false, true];
        let mut values = [3.0, 0.0, 0.0, f64::NAN];
        assert_eq!(fill_gap(&mut values, 1, &missing), 2);
        assert_eq!(&values[..3], &[3.0, 3.0, 3.0]);
        assert!(values[3].is_nan());
    }

    #[test]
    fn sliced_frames_shift_boundaries() {
        let feature = Feature::motion_index();
        let discard = BTreeSet::new();
        let repairer = Repairer::new(&feature, Generation::PikeLegacy, &discard);
        let df = legacy_frame(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 7.0, 8.0, 9.0, 10.0]])
            .slice_frames(Some(3), None);
        let (fixed, _) = repairer.repair(df, &assays());
        assert_eq!(fixed.rows()[0].values[2], 6.0);
    }

    #[test]
    fn boundary_nans_unified_without_zero_fill() {
        let feature = Feature::cd10_interpolated();
        let discard = BTreeSet::new();
        let repairer = Repairer::new(&feature, Generation::Pointgrey, &discard);
        assert!(!repairer.repairs_assay_gaps());
        let nan = f64::NAN;
        let mut first = meta(1, 1);
        first.generation = Generation::Pointgrey;
        let df = WellFrame::new(
            vec![
                WellRow {
                    meta: first.clone(),
                    values: vec![nan, 1.0, 0.0, 1.0, nan],
                },
                WellRow {
                    meta: meta(1, 2),
                    values: vec![1.0, 1.0, 0.0, nan, nan],
                },
            ],
            0,
        )
        .unwrap();
        let (fixed, report) = repairer.repair(df, &assays());
        assert_eq!(report.unified_start, 1);
        assert_eq!(report.unified_end, 2);
        for row in fixed.rows() {
            assert!(row.values[0].is_nan());
            assert_eq!(row.values[2], 0.0);
            assert!(row.values[3].is_nan() && row.values[4].is_nan());
        }
    }

    #[test]
    fn trash_controls_dropped() {
        let feature = Feature::cd10_interpolated();
        let discard = BTreeSet::from(["ignore".to_string()]);
        let repairer = Repairer::new(&feature, Generation::Pointgrey, &discard);
        let mut trash = meta(1, 2);
        trash.control = Some(ControlType {
            name: "ignore".to_string(),
            positive: false,
        });
        let df = WellFrame::new(
            vec![
                WellRow {
                    meta: meta(1, 1),
                    values: vec![1.0],
                },
                WellRow {
                    meta: trash,
                    values: vec![1.0],
                },
            ],
            0,
        )
        .unwrap();
        let (fixed, report) = repairer.repair(df, &BTreeMap::new());
        assert_eq!(fixed.len(), 1);
        assert_eq!(report.discarded, 1);
    }
}
