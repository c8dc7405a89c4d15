use std::io::{self, Write};

use serde::Serialize;

use crate::concerns::Concern;
use crate::domain::{Generation, RunId};
use crate::frame::WellFrame;
use crate::quick::{FetchOutcome, FrameOrigin};
use crate::stim::StimFrame;

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub origin: FrameOrigin,
    pub rows: usize,
    pub columns: usize,
    pub start_frame: usize,
    pub generations: Vec<Generation>,
    pub names: Vec<String>,
    pub runs: Vec<RunId>,
}

impl FetchSummary {
    pub fn of(outcome: &FetchOutcome) -> Self {
        let frame: &WellFrame = &outcome.frame;
        Self {
            origin: outcome.origin,
            rows: frame.len(),
            columns: frame.width(),
            start_frame: frame.start_frame(),
            generations: frame.generations().into_iter().collect(),
            names: frame.unique_names(),
            runs: frame.unique_runs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcernsResult {
    pub total: usize,
    pub snapshot: Option<String>,
    pub concerns: Vec<Concern>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResult {
    pub runs: Vec<RunId>,
    pub removed_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StimSummary {
    pub battery_id: u32,
    pub sample_rate_hz: u32,
    pub start_sample: usize,
    pub samples: usize,
    pub channels: Vec<String>,
}

impl StimSummary {
    pub fn of(stimframes: &StimFrame) -> Self {
        Self {
            battery_id: stimframes.battery_id,
            sample_rate_hz: stimframes.sample_rate_hz,
            start_sample: stimframes.start_sample,
            samples: stimframes.len(),
            channels: stimframes
                .channels
                .iter()
                .map(|channel| channel.name.clone())
                .collect(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch(summary: &FetchSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_concerns(result: &ConcernsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_invalidate(result: &InvalidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stim(summary: &StimSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
