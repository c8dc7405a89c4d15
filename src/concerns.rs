use std::error::Error;
use std::fmt::Write as _;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{RunId, Severity};
use crate::error::KiraError;
use crate::store::Store;

/// Trace of an error captured instead of propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFailure {
    pub message: String,
    /// `Display` of each `source()` in the chain, outermost first.
    pub chain: Vec<String>,
    pub debug: String,
}

impl CapturedFailure {
    pub fn capture(err: &KiraError) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            chain,
            debug: format!("{err:?}"),
        }
    }
}

/// A graded data-quality finding about one run. Never mutated once made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub run: RunId,
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub failure: Option<CapturedFailure>,
}

impl Concern {
    pub fn new(run: RunId, severity: Severity, kind: &str, message: String) -> Self {
        Self {
            run,
            severity,
            kind: kind.to_string(),
            message,
            failure: None,
        }
    }

    pub fn load_failure(run: RunId, err: &KiraError) -> Self {
        Self::from_failure(run, CapturedFailure::capture(err))
    }

    pub fn from_failure(run: RunId, failure: CapturedFailure) -> Self {
        Self {
            run,
            severity: Severity::Critical,
            kind: "load".to_string(),
            message: format!("failed to load {run}: {}", failure.message),
            failure: Some(failure),
        }
    }
}

/// Result of scanning one run in a batch.
pub type ScanOutcome = Result<Vec<Concern>, CapturedFailure>;

pub fn log_concerns(concerns: &[Concern], min_severity: Severity) {
    for concern in concerns.iter().filter(|c| c.severity >= min_severity) {
        match concern.severity {
            Severity::Informational => {
                info!(run = %concern.run, kind = %concern.kind, "{}", concern.message)
            }
            Severity::Caution | Severity::Critical => warn!(
                run = %concern.run,
                kind = %concern.kind,
                severity = %concern.severity,
                "{}",
                concern.message
            ),
        }
    }
}

/// Flat table with header `run,severity,kind,message,failure`.
pub fn to_csv(concerns: &[Concern]) -> String {
    let mut out = String::from("run,severity,kind,message,failure\n");
    for concern in concerns {
        let failure = concern
            .failure
            .as_ref()
            .map(|failure| failure.debug.as_str())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            concern.run.get(),
            concern.severity,
            csv_field(&concern.kind),
            csv_field(&concern.message),
            csv_field(failure)
        );
    }
    out
}

/// Overwrites `path` with the full table.
pub fn write_snapshot(path: &Utf8Path, concerns: &[Concern]) -> Result<(), KiraError> {
    Store::write_bytes_atomic(path, to_csv(concerns).as_bytes())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
