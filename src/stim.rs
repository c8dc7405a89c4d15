use serde::{Deserialize, Serialize};

use crate::domain::{TimeWindow, ms_to_index};
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assay {
    pub name: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// A named stimulus protocol: ordered assay segments plus the stimulus timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub legacy: bool,
    pub assays: Vec<Assay>,
    pub stimframes: StimFrame,
}

impl Battery {
    pub fn assay_frame(&self) -> AssayFrame {
        AssayFrame {
            battery_id: self.id,
            assays: self.assays.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssayFrame {
    pub battery_id: u32,
    pub assays: Vec<Assay>,
}

impl AssayFrame {
    /// Native frame indices where a new assay starts after an earlier one.
    ///
    /// The first assay's start is not a gap and is never reported.
    pub fn boundaries(&self, fps: u32) -> Vec<usize> {
        let mut starts: Vec<usize> = self
            .assays
            .iter()
            .map(|assay| ms_to_index(assay.start_ms, fps))
            .filter(|&frame| frame > 0)
            .collect();
        starts.sort_unstable();
        starts.dedup();
        starts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimChannel {
    pub name: String,
    #[serde(default)]
    pub audio_file: Option<u32>,
    pub values: Vec<f64>,
}

/// Stimulus intensity per channel, sampled at `sample_rate_hz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimFrame {
    pub battery_id: u32,
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub start_sample: usize,
    pub channels: Vec<StimChannel>,
}

impl StimFrame {
    pub fn len(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.values.len())
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice_ms(&self, window: TimeWindow) -> StimFrame {
        let (start, end) = window.to_frames(self.sample_rate_hz);
        let axis_end = self.start_sample + self.len();
        let from = start
            .unwrap_or(self.start_sample)
            .clamp(self.start_sample, axis_end);
        let to = end.unwrap_or(axis_end).clamp(from, axis_end);
        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let lo = (from - self.start_sample).min(channel.values.len());
                let hi = (to - self.start_sample).min(channel.values.len());
                StimChannel {
                    name: channel.name.clone(),
                    audio_file: channel.audio_file,
                    values: channel.values[lo..hi].to_vec(),
                }
            })
            .collect();
        StimFrame {
            battery_id: self.battery_id,
            sample_rate_hz: self.sample_rate_hz,
            start_sample: from,
            channels,
        }
    }

    /// Replaces each "on" stretch of an audio channel with its waveform's amplitude envelope.
    pub fn with_audio_waveforms<F>(&self, mut waveform_of: F) -> Result<StimFrame, KiraError>
    where
        F: FnMut(u32) -> Result<Waveform, KiraError>,
    {
        self.check_sample_rate()?;
        let mut out = self.clone();
        for channel in &mut out.channels {
            let Some(audio_id) = channel.audio_file else {
                continue;
            };
            let waveform = waveform_of(audio_id)?;
            let mut onset = None;
            for (i, value) in channel.values.iter_mut().enumerate() {
                if *value <= 0.0 {
                    onset = None;
                    continue;
                }
                let started = *onset.get_or_insert(i);
                let elapsed_ms = ((i - started) as u64 * 1000) / u64::from(self.sample_rate_hz);
                *value *= waveform.amplitude_at_ms(elapsed_ms);
            }
        }
        Ok(out)
    }

    pub fn check_sample_rate(&self) -> Result<(), KiraError> {
        if self.sample_rate_hz == 0 {
            return Err(KiraError::InvalidSampleRate(format!(
                "stimulus timeline of battery {} has a sample rate of 0 Hz",
                self.battery_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub audio_file: u32,
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl Waveform {
    /// Absolute sample value at `ms`, looping over the waveform.
    pub fn amplitude_at_ms(&self, ms: u64) -> f64 {
        if self.samples.is_empty() || self.sample_rate_hz == 0 {
            return 0.0;
        }
        let index = ms_to_index(ms, self.sample_rate_hz) % self.samples.len();
        f64::from(self.samples[index].abs())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn stim() -> StimFrame {
        StimFrame {
            battery_id: 3,
            sample_rate_hz: 1000,
            start_sample: 0,
            channels: vec![
                StimChannel {
                    name: "blue".to_string(),
                    audio_file: None,
                    values: vec![0.0, 1.0, 1.0, 0.0, 0.0],
                },
                StimChannel {
                    name: "solenoid".to_string(),
                    audio_file: Some(9),
                    values: vec![0.0, 0.0, 2.0, 2.0, 0.0],
                },
            ],
        }
    }

    #[test]
    fn boundaries_skip_first_assay() {
        let assays = AssayFrame {
            battery_id: 3,
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
        };
        assert_eq!(assays.boundaries(10), vec![5]);
    }

    #[test]
    fn slice_stimframes_by_ms() {
        let sliced = stim().slice_ms(TimeWindow::new(Some(1), Some(3)));
        assert_eq!(sliced.start_sample, 1);
        assert_eq!(sliced.channels[0].values, vec![1.0, 1.0]);
    }

    #[test]
    fn audio_channels_expanded() {
        let expanded = stim()
            .with_audio_waveforms(|id| {
                assert_eq!(id, 9);
                Ok(Waveform {
                    audio_file: 9,
                    sample_rate_hz: 1000,
                    samples: vec![0.5, -0.25],
                })
            })
            .unwrap();
        assert_eq!(expanded.channels[0], stim().channels[0]);
        assert_eq!(expanded.channels[1].values, vec![0.0, 0.0, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let mut broken = stim();
        broken.sample_rate_hz = 0;
        assert_matches!(
            broken.with_audio_waveforms(|_| unreachable!()),
            Err(KiraError::InvalidSampleRate(_))
        );
    }

    #[test]
    fn huge_windows_clamp_to_the_timeline() {
        let sliced = stim().slice_ms(TimeWindow::new(Some(u64::MAX / 2), None));
        assert_eq!(sliced.start_sample, 5);
        assert!(sliced.is_empty());
        let assays = AssayFrame {
            battery_id: 3,
            assays: vec![Assay {
                name: "late".to_string(),
                start_ms: u64::MAX,
                end_ms: u64::MAX,
            }],
        };
        assert_eq!(assays.boundaries(10), vec![usize::try_from(u64::MAX / 1000).unwrap()]);
    }
}
