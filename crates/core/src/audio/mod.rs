//! Audio spectrum input.
//!
//! A capture source (sound card callback, file decoder, the demo's
//! synthesizer) pushes sample blocks in; the analyzer reduces each block to a
//! small feature frame that visualizers read. The input itself carries no
//! capture backend: feature extraction internals and device plumbing stay
//! outside the core.

use std::{f32::consts::PI, sync::Arc};

use parking_lot::Mutex;
use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::ConfigHandle, participant::Input, Result, ShowError};

/// Band split points for the energy features.
const LOW_BAND_CUTOFF_HZ: f32 = 250.0;
const HIGH_BAND_CUTOFF_HZ: f32 = 2_000.0;

/// Features extracted from the most recent sample block. Band energies are
/// the share of total spectral magnitude in each band, in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFrame {
    pub rms: f32,
    pub low_band_energy: f32,
    pub high_band_energy: f32,
}

/// Reduces sample blocks to [`AudioFrame`]s with a windowed real FFT.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Consumes one block of samples and returns its feature frame.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AudioFrame> {
        if samples.len() < 2 {
            return Err(ShowError::msg(
                "audio analysis requires blocks with at least two samples",
            ));
        }

        let rms = compute_rms(samples);
        let len = samples.len();
        let bin_hz = self.sample_rate as f32 / len as f32;

        let fft = self.prepare_fft(len);
        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| ShowError::msg(err.to_string()))?;

        let mut total = 0.0;
        let mut low = 0.0;
        let mut high = 0.0;
        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            let freq = i as f32 * bin_hz;
            total += magnitude;
            if freq <= LOW_BAND_CUTOFF_HZ {
                low += magnitude;
            }
            if freq >= HIGH_BAND_CUTOFF_HZ {
                high += magnitude;
            }
        }

        let (low_band_energy, high_band_energy) = if total <= f32::EPSILON {
            (0.0, 0.0)
        } else {
            (low / total, high / total)
        };

        Ok(AudioFrame {
            rms,
            low_band_energy,
            high_band_energy,
        })
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            self.fft = Some(FftResources {
                size,
                plan,
                input,
                spectrum,
                scratch,
            });
        }

        self.fft.as_mut().expect("fft resources were just built")
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Concrete [`Input`] for the audio spectrum.
///
/// Capture runs wherever the samples come from; the operator thread only
/// copies the latest frame into this tick's snapshot, so visualizers observe
/// one consistent frame per tick.
pub struct AudioInput {
    config: ConfigHandle,
    analyzer: Mutex<SpectrumAnalyzer>,
    latest: Mutex<AudioFrame>,
    snapshot: Mutex<AudioFrame>,
    active: Mutex<bool>,
}

impl AudioInput {
    pub fn new(config: ConfigHandle) -> Self {
        let sample_rate = config.audio().sample_rate;
        Self {
            config,
            analyzer: Mutex::new(SpectrumAnalyzer::new(sample_rate)),
            latest: Mutex::new(AudioFrame::default()),
            snapshot: Mutex::new(AudioFrame::default()),
            active: Mutex::new(false),
        }
    }

    /// Feeds one block of captured samples. Empty blocks are ignored.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let frame = self.analyzer.lock().process_block(samples)?;
        *self.latest.lock() = frame;
        Ok(())
    }

    /// The frame snapshotted on the most recent tick.
    pub fn frame(&self) -> AudioFrame {
        *self.snapshot.lock()
    }
}

impl Input for AudioInput {
    fn is_active(&self) -> bool {
        *self.active.lock()
    }

    fn set_active(&self, active: bool) -> Result<()> {
        *self.active.lock() = active;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.audio().enabled
    }

    fn operator_update(&self) -> Result<()> {
        *self.snapshot.lock() = *self.latest.lock();
        Ok(())
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShowConfig;

    #[test]
    fn rms_of_a_constant_block_is_its_level() {
        let mut analyzer = SpectrumAnalyzer::new(48_000);
        let frame = analyzer.process_block(&[1.0; 256]).unwrap();
        assert!((frame.rms - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dc_lands_in_the_low_band() {
        let mut analyzer = SpectrumAnalyzer::new(48_000);
        let frame = analyzer.process_block(&[1.0; 256]).unwrap();
        assert!(frame.low_band_energy > frame.high_band_energy);
        assert!(frame.low_band_energy > 0.5);
    }

    #[test]
    fn nyquist_rate_signal_lands_in_the_high_band() {
        let mut analyzer = SpectrumAnalyzer::new(48_000);
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let frame = analyzer.process_block(&samples).unwrap();
        assert!(frame.high_band_energy > frame.low_band_energy);
    }

    #[test]
    fn rejects_blocks_that_are_too_short() {
        let mut analyzer = SpectrumAnalyzer::new(48_000);
        assert!(analyzer.process_block(&[1.0]).is_err());
    }

    #[test]
    fn snapshot_only_advances_on_operator_update() {
        let input = AudioInput::new(ConfigHandle::new(ShowConfig::default()));
        input.push_samples(&[1.0; 64]).unwrap();

        assert_eq!(input.frame(), AudioFrame::default());
        input.operator_update().unwrap();
        assert!(input.frame().rms > 0.0);
    }
}
