use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::frame::WellMeta;

/// How wells are named. Each policy is a pure function of row metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    #[default]
    Elegant,
    Well,
    Compound,
    Control,
}

impl NamingPolicy {
    pub fn name(self, meta: &WellMeta) -> String {
        match self {
            NamingPolicy::Elegant => match (meta.control_name(), &meta.compound) {
                (Some(control), _) => control.to_string(),
                (None, Some(compound)) => match meta.dose_um {
                    Some(dose) => format!("{compound} {} µM", format_dose(dose)),
                    None => compound.clone(),
                },
                (None, None) => meta.well_label.clone(),
            },
            NamingPolicy::Well => format!("{}:{}", meta.run, meta.well_label),
            NamingPolicy::Compound => meta
                .compound
                .clone()
                .unwrap_or_else(|| "solvent".to_string()),
            NamingPolicy::Control => meta
                .control_name()
                .map(str::to_string)
                .unwrap_or_else(|| "treatment".to_string()),
        }
    }
}

fn format_dose(dose: f64) -> String {
    let text = format!("{dose:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

impl fmt::Display for NamingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingPolicy::Elegant => write!(f, "elegant"),
            NamingPolicy::Well => write!(f, "well"),
            NamingPolicy::Compound => write!(f, "compound"),
            NamingPolicy::Control => write!(f, "control"),
        }
    }
}

impl FromStr for NamingPolicy {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "elegant" => Ok(NamingPolicy::Elegant),
            "well" => Ok(NamingPolicy::Well),
            "compound" => Ok(NamingPolicy::Compound),
            "control" => Ok(NamingPolicy::Control),
            _ => Err(KiraError::InvalidNamer(value.to_string())),
        }
    }
}
