//! Numeric transforms applied to one channel's sample window.
//!
//! The pipeline is stateless per call: detrend, then a zero-phase Butterworth
//! bandpass, then two fixed band-stop notches for mains-hum rejection. All
//! stages run forward-backward (filtfilt) so no phase lag is introduced into
//! the window.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F64};
use thiserror::Error;

/// Mains-hum rejection bands, covering both regional powerline frequencies.
/// Applied after the bandpass stage whenever the pipeline runs.
const NOTCH_BANDS_HZ: [(f64, f64); 2] = [(48.0, 52.0), (58.0, 62.0)];

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("empty sample window")]
    EmptyWindow,
    #[error("invalid band: {0}")]
    InvalidBand(String),
    #[error("coefficient design failed: {0}")]
    Design(String),
}

/// Bandpass parameters taken from the live settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandpassConfig {
    pub lowcut: f64,
    pub highcut: f64,
    pub order: u32,
}

pub struct FilterPipeline {
    sample_rate: f64,
}

impl FilterPipeline {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    /// Filters one channel's window, returning a new window of equal length.
    ///
    /// Identical input and config produce bit-identical output; the pipeline
    /// holds no state between calls.
    pub fn process(&self, window: &[f64], band: &BandpassConfig) -> Result<Vec<f64>, FilterError> {
        if window.is_empty() {
            return Err(FilterError::EmptyWindow);
        }
        let mut samples = detrended(window);

        let sections = self.bandpass_sections(band)?;
        filtfilt(&sections, &mut samples);

        for (low, high) in NOTCH_BANDS_HZ {
            let notch = self.notch_section(low, high)?;
            filtfilt(&[notch], &mut samples);
        }
        Ok(samples)
    }

    /// Butterworth bandpass realized as a cascade of second-order high-pass
    /// and low-pass sections, `ceil(order / 2)` of each.
    fn bandpass_sections(&self, band: &BandpassConfig) -> Result<Vec<Coefficients<f64>>, FilterError> {
        let nyquist = self.sample_rate / 2.0;
        if !(self.sample_rate > 0.0 && band.lowcut > 0.0 && band.lowcut < band.highcut && band.highcut < nyquist) {
            return Err(FilterError::InvalidBand(format!(
                "need 0 < lowcut < highcut < {} Hz, got [{}, {}]",
                nyquist, band.lowcut, band.highcut
            )));
        }
        if band.order == 0 {
            return Err(FilterError::InvalidBand("order must be >= 1".into()));
        }

        let hp = Coefficients::<f64>::from_params(
            Type::HighPass,
            self.sample_rate.hz(),
            band.lowcut.hz(),
            Q_BUTTERWORTH_F64,
        )
        .map_err(|e| FilterError::Design(format!("{e:?}")))?;
        let lp = Coefficients::<f64>::from_params(
            Type::LowPass,
            self.sample_rate.hz(),
            band.highcut.hz(),
            Q_BUTTERWORTH_F64,
        )
        .map_err(|e| FilterError::Design(format!("{e:?}")))?;

        let per_edge = ((band.order + 1) / 2) as usize;
        let mut sections = Vec::with_capacity(per_edge * 2);
        for _ in 0..per_edge {
            sections.push(hp.clone());
            sections.push(lp.clone());
        }
        Ok(sections)
    }

    fn notch_section(&self, low: f64, high: f64) -> Result<Coefficients<f64>, FilterError> {
        let center = (low + high) / 2.0;
        let q = center / (high - low);
        Coefficients::<f64>::from_params(Type::Notch, self.sample_rate.hz(), center.hz(), q)
            .map_err(|e| FilterError::Design(format!("{e:?}")))
    }
}

/// Window with its constant offset (mean) removed. Required before the
/// bandpass stage for stable behavior on offset-heavy electrode data.
fn detrended(window: &[f64]) -> Vec<f64> {
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    window.iter().map(|v| v - mean).collect()
}

/// Forward-backward application of a biquad cascade. Each pass starts from
/// fresh delay lines; the reversal cancels the phase shift of the forward
/// pass.
fn filtfilt(sections: &[Coefficients<f64>], samples: &mut Vec<f64>) {
    run_cascade(sections, samples);
    samples.reverse();
    run_cascade(sections, samples);
    samples.reverse();
}

fn run_cascade(sections: &[Coefficients<f64>], samples: &mut [f64]) {
    for coeffs in sections {
        let mut filter = DirectForm2Transposed::<f64>::new(coeffs.clone());
        for sample in samples.iter_mut() {
            *sample = filter.run(*sample);
        }
    }
}
