use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{ControlType, Generation, RunId, TimeWindow};
use crate::error::KiraError;
use crate::namer::NamingPolicy;

/// Metadata carried by one row of a [`WellFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellMeta {
    pub run: RunId,
    pub well_index: u16,
    pub well_label: String,
    pub compound: Option<String>,
    pub dose_um: Option<f64>,
    pub control: Option<ControlType>,
    pub pack: Option<String>,
    pub battery_id: u32,
    pub generation: Generation,
    pub frames_per_second: u32,
    pub name: String,
    pub display_name: String,
    /// Number of wells reduced into this row; 1 for unaggregated rows.
    pub size: usize,
}

impl WellMeta {
    pub fn is_control(&self) -> bool {
        self.control.is_some()
    }

    pub fn control_name(&self) -> Option<&str> {
        self.control.as_ref().map(|control| control.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellRow {
    pub meta: WellMeta,
    pub values: Vec<f64>,
}

impl WellRow {
    /// Whether any cell holds a measurement.
    pub fn has_values(&self) -> bool {
        self.values.iter().any(|v| !v.is_nan())
    }
}

/// Rows are wells and columns are frames in time order.
///
/// `start_frame` is the native index of the first column, so a frame sliced
/// by time still knows where its columns sit on the run's frame axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellFrame {
    rows: Vec<WellRow>,
    start_frame: usize,
    width: usize,
}

impl WellFrame {
    pub fn new(rows: Vec<WellRow>, start_frame: usize) -> Result<Self, KiraError> {
        let width = rows.first().map(|row| row.values.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|row| row.values.len() != width) {
            return Err(KiraError::RaggedFrame(format!(
                "{} {} has {} columns; expected {width}",
                bad.meta.run,
                bad.meta.well_label,
                bad.values.len()
            )));
        }
        Ok(Self {
            rows,
            start_frame,
            width,
        })
    }

    /// Builds a frame from rows of varying length, padding the tail of shorter rows with NaN.
    pub fn padded(rows: Vec<WellRow>) -> Self {
        let width = rows.iter().map(|row| row.values.len()).max().unwrap_or(0);
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.values.resize(width, f64::NAN);
                row
            })
            .collect();
        Self {
            rows,
            start_frame: 0,
            width,
        }
    }

    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            start_frame: 0,
            width: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    /// Native frame indices of the columns.
    pub fn frame_axis(&self) -> std::ops::Range<usize> {
        self.start_frame..self.start_frame + self.width
    }

    pub fn rows(&self) -> &[WellRow] {
        &self.rows
    }

    pub fn unique_runs(&self) -> Vec<RunId> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.meta.run))
            .map(|row| row.meta.run)
            .collect()
    }

    pub fn unique_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.meta.name.clone()))
            .map(|row| row.meta.name.clone())
            .collect()
    }

    pub fn unique_batteries(&self) -> BTreeSet<u32> {
        self.rows.iter().map(|row| row.meta.battery_id).collect()
    }

    pub fn generations(&self) -> BTreeSet<Generation> {
        self.rows.iter().map(|row| row.meta.generation).collect()
    }

    /// Distinct control types present, optionally restricted to positive or negative ones.
    pub fn unique_controls(&self, positive: Option<bool>) -> Vec<ControlType> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.meta.control.as_ref())
            .filter(|control| positive.is_none_or(|wanted| control.positive == wanted))
            .filter(|control| seen.insert(control.name.clone()))
            .cloned()
            .collect()
    }

    pub fn frames_per_second(&self) -> Result<Option<u32>, KiraError> {
        let rates: BTreeSet<u32> = self
            .rows
            .iter()
            .map(|row| row.meta.frames_per_second)
            .collect();
        match rates.len() {
            0 => Ok(None),
            1 => Ok(rates.into_iter().next()),
            _ => Err(KiraError::MultipleFrameRates(
                rates
                    .iter()
                    .map(|rate| rate.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Keeps the columns whose native index lies in `[start, end)`.
    pub fn slice_frames(&self, start: Option<usize>, end: Option<usize>) -> WellFrame {
        let axis_end = self.start_frame + self.width;
        let from = start.unwrap_or(self.start_frame).clamp(self.start_frame, axis_end);
        let to = end.unwrap_or(axis_end).clamp(from, axis_end);
        let lo = from - self.start_frame;
        let hi = to - self.start_frame;
        let rows = self
            .rows
            .iter()
            .map(|row| WellRow {
                meta: row.meta.clone(),
                values: row.values[lo..hi].to_vec(),
            })
            .collect();
        WellFrame {
            rows,
            start_frame: from,
            width: hi - lo,
        }
    }

    pub fn slice_ms(&self, window: TimeWindow) -> Result<WellFrame, KiraError> {
        if window.is_full() {
            return Ok(self.clone());
        }
        let Some(fps) = self.frames_per_second()? else {
            return Ok(self.clone());
        };
        let (start, end) = window.to_frames(fps);
        Ok(self.slice_frames(start, end))
    }

    /// Stable total order over (run, well).
    pub fn sort_standard(&self) -> WellFrame {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|row| (row.meta.run, row.meta.well_index));
        WellFrame {
            rows,
            start_frame: self.start_frame,
            width: self.width,
        }
    }

    pub fn with_names(&self, namer: NamingPolicy) -> WellFrame {
        self.map_meta(|meta| {
            meta.name = namer.name(meta);
            meta.display_name = meta.name.clone();
        })
    }

    pub fn with_controls(&self, names: Option<&[String]>) -> WellFrame {
        self.filter_rows(|row| match (row.meta.control_name(), names) {
            (Some(control), Some(names)) => names.iter().any(|name| name == control),
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    pub fn without_controls(&self, names: &BTreeSet<String>) -> WellFrame {
        self.filter_rows(|row| {
            row.meta
                .control_name()
                .is_none_or(|control| !names.contains(control))
        })
    }

    pub fn with_name(&self, name: &str) -> WellFrame {
        self.filter_rows(|row| row.meta.name == name)
    }

    pub fn filter_rows<F: Fn(&WellRow) -> bool>(&self, keep: F) -> WellFrame {
        WellFrame {
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
            start_frame: self.start_frame,
            width: self.width,
        }
    }

    pub fn map_meta<F: Fn(&mut WellMeta)>(&self, update: F) -> WellFrame {
        let mut out = self.clone();
        for row in &mut out.rows {
            update(&mut row.meta);
        }
        out
    }

    /// `(case - mean(controls)) / std(self)` per column.
    pub fn zscore_against(&self, controls: &WellFrame) -> WellFrame {
        let control_values: Vec<&[f64]> = controls
            .rows
            .iter()
            .map(|row| row.values.as_slice())
            .collect();
        let case_values: Vec<&[f64]> = self.rows.iter().map(|row| row.values.as_slice()).collect();
        let means = nan_mean(&control_values, self.width);
        let stds = nan_std(&case_values, self.width);
        let mut out = self.clone();
        for row in &mut out.rows {
            for (col, value) in row.values.iter_mut().enumerate() {
                *value = (*value - means[col]) / stds[col];
            }
        }
        out
    }

    pub fn fill_nan(&mut self, value: f64) -> usize {
        let mut filled = 0;
        for row in &mut self.rows {
            for cell in row.values.iter_mut().filter(|cell| cell.is_nan()) {
                *cell = value;
                filled += 1;
            }
        }
        filled
    }

    /// Makes the trailing NaN run identical across rows, returning its length.
    /// Rows without any value take no part in choosing the run.
    pub fn unify_last_nans(&mut self) -> usize {
        let longest = self
            .rows
            .iter()
            .filter(|row| row.has_values())
            .map(|row| row.values.iter().rev().take_while(|v| v.is_nan()).count())
            .max()
            .unwrap_or(0);
        let from = self.width - longest;
        for row in &mut self.rows {
            row.values[from..].fill(f64::NAN);
        }
        longest
    }

    /// Makes the leading NaN run identical across rows, returning its length.
    /// Rows without any value take no part in choosing the run.
    pub fn unify_first_nans(&mut self) -> usize {
        let longest = self
            .rows
            .iter()
            .filter(|row| row.has_values())
            .map(|row| row.values.iter().take_while(|v| v.is_nan()).count())
            .max()
            .unwrap_or(0);
        for row in &mut self.rows {
            row.values[..longest].fill(f64::NAN);
        }
        longest
    }

    /// Same time axis, new rows. Rows must already have this frame's width.
    pub(crate) fn with_rows(&self, rows: Vec<WellRow>) -> WellFrame {
        debug_assert!(rows.iter().all(|row| row.values.len() == self.width));
        WellFrame {
            rows,
            start_frame: self.start_frame,
            width: self.width,
        }
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [WellRow] {
        &mut self.rows
    }

    /// Groups row indices by `key`, in order of first appearance.
    pub(crate) fn group_indices<K: Ord + Clone, F: Fn(&WellMeta) -> K>(
        &self,
        key: F,
    ) -> Vec<Vec<usize>> {
        let mut order: Vec<K> = Vec::new();
        let mut groups: BTreeMap<K, Vec<usize>> = BTreeMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            let k = key(&row.meta);
            groups
                .entry(k.clone())
                .or_insert_with(|| {
                    order.push(k);
                    Vec::new()
                })
                .push(index);
        }
        order
            .into_iter()
            .filter_map(|k| groups.remove(&k))
            .collect()
    }
}

/// Column means ignoring NaN; columns with no finite values stay NaN.
pub fn nan_mean(rows: &[&[f64]], width: usize) -> Vec<f64> {
    (0..width)
        .map(|col| {
            let (sum, n) = rows
                .iter()
                .map(|values| values[col])
                .filter(|value| !value.is_nan())
                .fold((0.0, 0usize), |(sum, n), value| (sum + value, n + 1));
            if n == 0 { f64::NAN } else { sum / n as f64 }
        })
        .collect()
}

/// Sample standard deviation per column ignoring NaN.
pub fn nan_std(rows: &[&[f64]], width: usize) -> Vec<f64> {
    let means = nan_mean(rows, width);
    (0..width)
        .map(|col| {
            let values: Vec<f64> = rows
                .iter()
                .map(|values| values[col])
                .filter(|value| !value.is_nan())
                .collect();
            if values.len() < 2 {
                return f64::NAN;
            }
            let var = values
                .iter()
                .map(|value| (value - means[col]).powi(2))
                .sum::<f64>()
                / (values.len() - 1) as f64;
            var.sqrt()
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;

    use super::*;

    pub(crate) fn meta(run: u64, well: u16) -> WellMeta {
        WellMeta {
            run: RunId(run),
            well_index: well,
            well_label: format!("A{:02}", well),
            compound: None,
            dose_um: None,
            control: None,
            pack: None,
            battery_id: 1,
            generation: Generation::Pointgrey,
            frames_per_second: 10,
            name: String::new(),
            display_name: String::new(),
            size: 1,
        }
    }

    fn frame(rows: Vec<(u64, u16, Vec<f64>)>) -> WellFrame {
        WellFrame::new(
            rows.into_iter()
                .map(|(run, well, values)| WellRow {
                    meta: meta(run, well),
                    values,
                })
                .collect(),
            0,
        )
        .unwrap()
    }

    #[test]
    fn ragged_rows_rejected() {
        let rows = vec![
            WellRow {
                meta: meta(1, 1),
                values: vec![1.0, 2.0],
            },
            WellRow {
                meta: meta(1, 2),
                values: vec![1.0],
            },
        ];
        assert_matches!(WellFrame::new(rows, 0), Err(KiraError::RaggedFrame(_)));
    }

    #[test]
    fn padded_fills_short_rows_with_nan() {
        let rows = vec![
            WellRow {
                meta: meta(1, 1),
                values: vec![1.0, 2.0, 3.0],
            },
            WellRow {
                meta: meta(1, 2),
                values: vec![1.0],
            },
        ];
        let df = WellFrame::padded(rows);
        assert_eq!(df.width(), 3);
        assert!(df.rows()[1].values[1].is_nan());
        assert!(df.rows()[1].values[2].is_nan());
    }

    #[test]
    fn empty_rows_do_not_drive_unification() {
        let rows = vec![
            WellRow {
                meta: meta(1, 1),
                values: vec![1.0, 2.0, f64::NAN],
            },
            WellRow {
                meta: meta(1, 2),
                values: vec![f64::NAN, 4.0, 5.0],
            },
            WellRow {
                meta: meta(1, 3),
                values: vec![],
            },
        ];
        let mut df = WellFrame::padded(rows);
        assert_eq!(df.unify_last_nans(), 1);
        assert_eq!(df.unify_first_nans(), 1);
        assert_eq!(df.rows()[0].values[1], 2.0);
        assert_eq!(df.rows()[1].values[1], 4.0);
        assert!(df.rows()[2].values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn last_nans_unified_to_longest_run() {
        let mut df = frame(vec![
            (1, 1, vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, f64::NAN, f64::NAN]),
            (1, 2, vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, f64::NAN]),
        ]);
        assert_eq!(df.unify_last_nans(), 2);
        for row in df.rows() {
            let nans: Vec<usize> = (0..10).filter(|&i| row.values[i].is_nan()).collect();
            assert_eq!(nans, vec![8, 9]);
        }
    }

    #[test]
    fn first_nans_unified() {
        let mut df = frame(vec![
            (1, 1, vec![f64::NAN, 1.0, 1.0]),
            (1, 2, vec![1.0, 1.0, 1.0]),
        ]);
        assert_eq!(df.unify_first_nans(), 1);
        assert!(df.rows()[1].values[0].is_nan());
        assert_eq!(df.rows()[1].values[1], 1.0);
    }

    #[test]
    fn slice_keeps_order_and_tracks_offset() {
        let df = frame(vec![(1, 1, (0..10).map(f64::from).collect())]);
        let sliced = df.slice_ms(TimeWindow::new(Some(200), Some(600))).unwrap();
        assert_eq!(sliced.start_frame(), 2);
        assert_eq!(sliced.rows()[0].values, vec![2.0, 3.0, 4.0, 5.0]);
        let again = sliced.slice_frames(Some(3), None);
        assert_eq!(again.frame_axis(), 3..6);
        assert_eq!(again.rows()[0].values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn slice_rejects_mixed_rates() {
        let mut df = frame(vec![(1, 1, vec![1.0]), (2, 1, vec![1.0])]);
        df.rows_mut()[1].meta.frames_per_second = 25;
        assert_matches!(
            df.slice_ms(TimeWindow::new(Some(10), None)),
            Err(KiraError::MultipleFrameRates(_))
        );
    }

    #[test]
    fn standard_sort_is_by_run_then_well() {
        let df = frame(vec![(2, 1, vec![0.0]), (1, 3, vec![0.0]), (1, 2, vec![0.0])]);
        let sorted = df.sort_standard();
        let keys: Vec<(u64, u16)> = sorted
            .rows()
            .iter()
            .map(|row| (row.meta.run.get(), row.meta.well_index))
            .collect();
        assert_eq!(keys, vec![(1, 2), (1, 3), (2, 1)]);
    }

    #[test]
    fn nan_statistics() {
        let a = [1.0, f64::NAN];
        let b = [3.0, f64::NAN];
        let rows: Vec<&[f64]> = vec![&a, &b];
        let mean = nan_mean(&rows, 2);
        assert_eq!(mean[0], 2.0);
        assert!(mean[1].is_nan());
        let std = nan_std(&rows, 2);
        assert!((std[0] - 2.0_f64.sqrt()).abs() < 1e-12);
    }
}
