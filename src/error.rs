use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("refusing request: {0}")]
    RefusingRequest(String),

    #[error("got multiple generations in one frame: {found}")]
    MultipleGenerations { found: String },

    #[error("wrong generation {found}; expected {expected}")]
    IncompatibleGeneration { found: String, expected: String },

    #[error("{0}")]
    NoFeatures(String),

    #[error("contradictory request: {0}")]
    ContradictoryRequest(String),

    #[error("invalid run reference: {0}")]
    InvalidRunRef(String),

    #[error("invalid query expression: {0}")]
    InvalidExpression(String),

    #[error("invalid feature: {0}")]
    InvalidFeature(String),

    #[error("invalid generation: {0}")]
    InvalidGeneration(String),

    #[error("invalid severity: {0}")]
    InvalidSeverity(String),

    #[error("invalid naming policy: {0}")]
    InvalidNamer(String),

    #[error("invalid aggregation type: {0}")]
    InvalidAggType(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("no runs matched: {0}")]
    NoRuns(String),

    #[error("battery not found: {0}")]
    BatteryNotFound(String),

    #[error("sensor {sensor} not recorded on run {run}")]
    SensorNotFound { run: String, sensor: String },

    #[error("audio file not found: {0}")]
    AudioNotFound(String),

    #[error("no video recorded for run {0}")]
    VideoNotFound(String),

    #[error("rows have different widths: {0}")]
    RaggedFrame(String),

    #[error("cannot slice by milliseconds across frame rates {0}")]
    MultipleFrameRates(String),

    #[error("{0}")]
    NoSingleControl(String),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(String),

    #[error("missing config file kira-wf.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to encode cache payload: {0}")]
    CacheEncode(String),

    #[error("failed to decode cache payload: {0}")]
    CacheDecode(String),
}
