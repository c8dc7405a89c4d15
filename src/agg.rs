use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::frame::{WellFrame, WellMeta, WellRow, nan_mean};

/// Row-grouping reduction applied at the end of a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AggType {
    #[default]
    None,
    Name,
    Important,
    Pack,
    Run,
}

impl AggType {
    pub fn agg(self, frame: &WellFrame) -> WellFrame {
        match self {
            AggType::None => frame.clone(),
            AggType::Name => agg_by(frame, |meta| meta.name.clone()),
            AggType::Important => agg_by(frame, |meta| {
                (
                    meta.name.clone(),
                    meta.control_name().map(str::to_string),
                    meta.compound.clone(),
                    meta.dose_um.map(f64::to_bits),
                )
            }),
            AggType::Pack => agg_by(frame, |meta| (meta.name.clone(), meta.pack.clone())),
            AggType::Run => agg_by(frame, |meta| meta.run),
        }
    }
}

impl fmt::Display for AggType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggType::None => write!(f, "none"),
            AggType::Name => write!(f, "name"),
            AggType::Important => write!(f, "important"),
            AggType::Pack => write!(f, "pack"),
            AggType::Run => write!(f, "run"),
        }
    }
}

impl FromStr for AggType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(AggType::None),
            "name" => Ok(AggType::Name),
            "important" => Ok(AggType::Important),
            "pack" => Ok(AggType::Pack),
            "run" => Ok(AggType::Run),
            _ => Err(KiraError::InvalidAggType(value.to_string())),
        }
    }
}

/// Mean of each group's rows; group metadata is taken from its first row.
fn agg_by<K: Ord + Clone, F: Fn(&WellMeta) -> K>(frame: &WellFrame, key: F) -> WellFrame {
    let rows = frame.rows();
    let grouped = frame
        .group_indices(key)
        .into_iter()
        .map(|members| {
            let values: Vec<&[f64]> = members.iter().map(|&i| rows[i].values.as_slice()).collect();
            let mut meta = rows[members[0]].meta.clone();
            meta.size = members.iter().map(|&i| rows[i].meta.size).sum();
            WellRow {
                meta,
                values: nan_mean(&values, frame.width()),
            }
        })
        .collect();
    frame.with_rows(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::meta;

    fn frame() -> WellFrame {
        let row = |run: u64, well: u16, name: &str, pack: &str, values: Vec<f64>| {
            let mut m = meta(run, well);
            m.name = name.to_string();
            m.pack = Some(pack.to_string());
            WellRow { meta: m, values }
        };
        WellFrame::new(
            vec![
                row(1, 1, "b", "p1", vec![1.0, 2.0]),
                row(1, 2, "a", "p1", vec![3.0, f64::NAN]),
                row(2, 1, "b", "p2", vec![3.0, 4.0]),
            ],
            4,
        )
        .unwrap()
    }

    #[test]
    fn none_is_identity() {
        assert_eq!(AggType::None.agg(&frame()).len(), 3);
    }

    #[test]
    fn by_name_keeps_first_appearance_order_and_axis() {
        let agged = AggType::Name.agg(&frame());
        assert_eq!(agged.unique_names(), vec!["b", "a"]);
        assert_eq!(agged.rows()[0].values, vec![2.0, 3.0]);
        assert_eq!(agged.rows()[0].meta.size, 2);
        assert_eq!(agged.rows()[1].values[0], 3.0);
        assert!(agged.rows()[1].values[1].is_nan());
        assert_eq!(agged.frame_axis(), 4..6);
    }

    #[test]
    fn by_pack_and_run() {
        assert_eq!(AggType::Pack.agg(&frame()).len(), 3);
        assert_eq!(AggType::Run.agg(&frame()).len(), 2);
        assert_eq!(AggType::Important.agg(&frame()).len(), 2);
    }

    #[test]
    fn parse_agg_type() {
        assert_eq!("Important".parse::<AggType>().unwrap(), AggType::Important);
        assert!("median".parse::<AggType>().is_err());
    }
}
