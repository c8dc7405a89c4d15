use crate::concerns::Concern;
use crate::domain::{Generation, RunId, Severity};
use crate::error::KiraError;
use crate::frame::{WellFrame, WellRow};

/// Fails unless every row belongs to exactly `expected`.
pub fn check_generations(frame: &WellFrame, expected: Generation) -> Result<(), KiraError> {
    let generations = frame.generations();
    if generations.len() > 1 {
        return Err(KiraError::MultipleGenerations {
            found: generations
                .iter()
                .map(|generation| generation.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    match generations.into_iter().next() {
        Some(found) if found != expected => Err(KiraError::IncompatibleGeneration {
            found: found.to_string(),
            expected: expected.to_string(),
        }),
        _ => Ok(()),
    }
}

/// One advisory quality check.
pub trait ConcernRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, run: RunId, rows: &[&WellRow]) -> Vec<Concern>;
}

/// Reports trailing missing frames; always yields exactly one finding per run.
pub struct MissingFramesRule {
    /// Fraction of the run's width above which missing frames are critical.
    pub critical_fraction: f64,
}

impl ConcernRule for MissingFramesRule {
    fn name(&self) -> &'static str {
        "missing-frames"
    }

    fn evaluate(&self, run: RunId, rows: &[&WellRow]) -> Vec<Concern> {
        let width = rows.first().map(|row| row.values.len()).unwrap_or(0);
        let missing = rows
            .iter()
            .map(|row| row.values.iter().rev().take_while(|v| v.is_nan()).count())
            .max()
            .unwrap_or(0);
        let severity = if missing == 0 {
            Severity::Informational
        } else if width > 0 && missing as f64 / width as f64 > self.critical_fraction {
            Severity::Critical
        } else {
            Severity::Caution
        };
        vec![Concern::new(
            run,
            severity,
            self.name(),
            format!("{run} is missing {missing} of {width} frame(s) at the end"),
        )]
    }
}

/// Wells that never register a value.
pub struct DeadWellsRule;

impl ConcernRule for DeadWellsRule {
    fn name(&self) -> &'static str {
        "dead-wells"
    }

    fn evaluate(&self, run: RunId, rows: &[&WellRow]) -> Vec<Concern> {
        let dead: Vec<&str> = rows
            .iter()
            .filter(|row| row.values.iter().all(|v| v.is_nan() || *v == 0.0))
            .map(|row| row.meta.well_label.as_str())
            .collect();
        if dead.is_empty() {
            return Vec::new();
        }
        let severity = if dead.len() * 2 > rows.len() {
            Severity::Critical
        } else {
            Severity::Caution
        };
        vec![Concern::new(
            run,
            severity,
            self.name(),
            format!("{run} has {} dead well(s): {}", dead.len(), dead.join(", ")),
        )]
    }
}

/// Missing frames inside the trace rather than at its ends.
pub struct InteriorNanRule;

impl ConcernRule for InteriorNanRule {
    fn name(&self) -> &'static str {
        "interior-nans"
    }

    fn evaluate(&self, run: RunId, rows: &[&WellRow]) -> Vec<Concern> {
        let interior: usize = rows
            .iter()
            .map(|row| {
                let values = &row.values;
                let lead = values.iter().take_while(|v| v.is_nan()).count();
                let trail = values.iter().rev().take_while(|v| v.is_nan()).count();
                if lead + trail >= values.len() {
                    return 0;
                }
                values[lead..values.len() - trail]
                    .iter()
                    .filter(|v| v.is_nan())
                    .count()
            })
            .sum();
        if interior == 0 {
            return Vec::new();
        }
        vec![Concern::new(
            run,
            Severity::Caution,
            self.name(),
            format!("{run} has {interior} missing value(s) between recorded frames"),
        )]
    }
}

/// The set of rules applied by the soft quality scan.
pub struct RuleBattery {
    rules: Vec<Box<dyn ConcernRule>>,
}

impl RuleBattery {
    pub fn new(rules: Vec<Box<dyn ConcernRule>>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(MissingFramesRule {
                critical_fraction: 0.05,
            }),
            Box::new(DeadWellsRule),
            Box::new(InteriorNanRule),
        ])
    }

    /// Findings for every run in `frame`, in run order then rule order.
    pub fn of(&self, frame: &WellFrame, min_severity: Severity) -> Vec<Concern> {
        let mut concerns = Vec::new();
        for run in frame.unique_runs() {
            let rows: Vec<&WellRow> = frame
                .rows()
                .iter()
                .filter(|row| row.meta.run == run)
                .collect();
            for rule in &self.rules {
                concerns.extend(
                    rule.evaluate(run, &rows)
                        .into_iter()
                        .filter(|concern| concern.severity >= min_severity),
                );
            }
        }
        concerns
    }
}

impl Default for RuleBattery {
    fn default() -> Self {
        Self::standard()
    }
}
