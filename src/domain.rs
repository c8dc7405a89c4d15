use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static SUBMISSION_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{12}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl RunId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A single scalar reference to a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunRef {
    Id(RunId),
    Name(String),
    Tag(String),
    Submission(String),
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunRef::Id(id) => write!(f, "{id}"),
            RunRef::Name(name) => write!(f, "{name}"),
            RunRef::Tag(tag) => write!(f, "tag:{tag}"),
            RunRef::Submission(hash) => write!(f, "submission {hash}"),
        }
    }
}

impl From<RunId> for RunRef {
    fn from(id: RunId) -> Self {
        RunRef::Id(id)
    }
}

impl FromStr for RunRef {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidRunRef(value.to_string()));
        }
        if let Some(tag) = trimmed.strip_prefix("tag:") {
            if tag.is_empty() {
                return Err(KiraError::InvalidRunRef(value.to_string()));
            }
            return Ok(RunRef::Tag(tag.to_string()));
        }
        let digits = trimmed.strip_prefix('r').unwrap_or(trimmed);
        if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
            let id = digits
                .parse::<u64>()
                .map_err(|_| KiraError::InvalidRunRef(value.to_string()))?;
            return Ok(RunRef::Id(RunId(id)));
        }
        if SUBMISSION_HASH.is_match(trimmed) {
            return Ok(RunRef::Submission(trimmed.to_string()));
        }
        Ok(RunRef::Name(trimmed.to_string()))
    }
}

/// Hardware and software era of a recording.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Generation {
    PikeLegacy,
    PikeMgh,
    PikeSauronx,
    PointgreyAlpha,
    Pointgrey,
}

impl Generation {
    pub fn all() -> [Generation; 5] {
        [
            Generation::PikeLegacy,
            Generation::PikeMgh,
            Generation::PikeSauronx,
            Generation::PointgreyAlpha,
            Generation::Pointgrey,
        ]
    }

    pub fn is_sauronx(self) -> bool {
        matches!(
            self,
            Generation::PikeSauronx | Generation::PointgreyAlpha | Generation::Pointgrey
        )
    }

    pub fn is_pointgrey(self) -> bool {
        matches!(self, Generation::PointgreyAlpha | Generation::Pointgrey)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Generation::PikeLegacy => "pike-legacy",
            Generation::PikeMgh => "pike-mgh",
            Generation::PikeSauronx => "pike-sauronx",
            Generation::PointgreyAlpha => "pointgrey-alpha",
            Generation::Pointgrey => "pointgrey",
        }
    }

    /// The feature analyses on this generation should default to.
    pub fn preferred_feature(self) -> Feature {
        if self.is_pointgrey() {
            Feature::cd10_interpolated()
        } else {
            Feature::motion_index()
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Generation {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('_', "-");
        Generation::all()
            .into_iter()
            .find(|generation| generation.as_str() == normalized)
            .ok_or_else(|| KiraError::InvalidGeneration(value.to_string()))
    }
}

/// A derived per-frame measurement channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub internal_name: String,
    pub time_dependent: bool,
    pub interpolated: bool,
}

impl Feature {
    pub fn motion_index() -> Self {
        Self {
            name: "MI".to_string(),
            internal_name: "MI".to_string(),
            time_dependent: true,
            interpolated: false,
        }
    }

    pub fn cd10_interpolated() -> Self {
        Self {
            name: "cd(10)-i".to_string(),
            internal_name: "cd(10)".to_string(),
            time_dependent: true,
            interpolated: true,
        }
    }

    pub fn custom(name: &str, time_dependent: bool) -> Self {
        Self {
            name: name.to_string(),
            internal_name: name.to_string(),
            time_dependent,
            interpolated: false,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Feature {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Err(KiraError::InvalidFeature(value.to_string())),
            "mi" => Ok(Feature::motion_index()),
            "cd(10)-i" | "cd10i" | "cd_10_i" => Ok(Feature::cd10_interpolated()),
            _ => Ok(Feature::custom(trimmed, false)),
        }
    }
}

/// Ordered grade of a data-quality finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Caution,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Informational => write!(f, "informational"),
            Severity::Caution => write!(f, "caution"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "informational" | "info" | "good" => Ok(Severity::Informational),
            "caution" | "warning" => Ok(Severity::Caution),
            "critical" => Ok(Severity::Critical),
            _ => Err(KiraError::InvalidSeverity(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlType {
    pub name: String,
    pub positive: bool,
}

/// Control categories whose wells are unreliable and dropped by repair.
pub fn trash_controls() -> Vec<String> {
    vec![
        "ignore".to_string(),
        "near-WT (-)".to_string(),
        "no drug transfer".to_string(),
        "low drug transfer".to_string(),
    ]
}

/// Milliseconds after the first frame; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl TimeWindow {
    pub fn new(start_ms: Option<u64>, end_ms: Option<u64>) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn full() -> Self {
        Self::default()
    }

    pub fn is_full(&self) -> bool {
        self.start_ms.is_none() && self.end_ms.is_none()
    }

    /// Converts to a half-open frame range at `fps`.
    pub fn to_frames(&self, fps: u32) -> (Option<usize>, Option<usize>) {
        let convert = |ms: u64| ms_to_index(ms, fps);
        (self.start_ms.map(convert), self.end_ms.map(convert))
    }
}

/// Sample index of `ms` at `rate_hz`, saturating instead of overflowing.
pub fn ms_to_index(ms: u64, rate_hz: u32) -> usize {
    let index = ms.saturating_mul(u64::from(rate_hz)) / 1000;
    usize::try_from(index).unwrap_or(usize::MAX)
}
