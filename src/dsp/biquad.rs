use std::f64;

use strum::{Display, EnumIter, EnumString, VariantNames};

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Available filter types for the biquad filter.
#[derive(
    Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString, VariantNames,
)]
pub enum BiquadFilterType {
    #[default]
    LowPass,
    HiPass,
    BandPass,
    /// Peaking EQ: boosts with positive, notches with negative gains.
    PeakNotch,
    AllPass,
}

// -------------------------------------------------------------------------------------------------

/// Normalized direct form coefficients of a biquad filter.
///
/// Coefficients are calculated with the formulas from Robert Bristow-Johnson's audio EQ cookbook.
/// See [`BiquadFilter`] for the filter implementation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BiquadFilterCoefficients {
    filter_type: BiquadFilterType,
    sample_rate: u32,
    cutoff: f32,
    q: f32,
    gain: f32,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadFilterCoefficients {
    pub fn new(
        filter_type: BiquadFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
        gain: f32,
    ) -> Result<Self, Error> {
        let mut coefficients = BiquadFilterCoefficients::default();
        coefficients.set(filter_type, sample_rate, cutoff, q, gain)?;
        Ok(coefficients)
    }

    pub fn filter_type(&self) -> BiquadFilterType {
        self.filter_type
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The cutoff or center frequency in Hz.
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// The resonance (Q factor).
    pub fn q(&self) -> f32 {
        self.q
    }

    /// The gain in dB. Only used by PeakNotch filters.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets and applies a batch of new filter parameters.
    pub fn set(
        &mut self,
        filter_type: BiquadFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
        gain: f32,
    ) -> Result<(), Error> {
        self.filter_type = filter_type;
        self.sample_rate = sample_rate;
        self.cutoff = cutoff;
        self.q = q;
        self.gain = gain;
        self.apply()
    }

    /// Validates the filter parameters and calculates the coefficients.
    pub fn apply(&mut self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter sample-rate: must be > 0, but is {s}",
                s = self.sample_rate
            )));
        }
        if !(self.q > 0.0) || !self.q.is_finite() {
            return Err(Error::ParameterError(format!(
                "Invalid filter Q: must be > 0, but is {q}",
                q = self.q
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.cutoff > 0.0 && self.cutoff < nyquist) {
            return Err(Error::ParameterError(format!(
                "Invalid filter frequency: must be > 0 and < nyquist {nyquist}, but is {f}",
                f = self.cutoff
            )));
        }
        if !self.gain.is_finite() {
            return Err(Error::ParameterError(format!(
                "Invalid filter gain: must be finite, but is {g}",
                g = self.gain
            )));
        }

        let w0 = 2.0 * f64::consts::PI * self.cutoff as f64 / self.sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * self.q as f64);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            BiquadFilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            BiquadFilterType::HiPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            BiquadFilterType::BandPass => (
                // constant 0 dB peak gain
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            BiquadFilterType::PeakNotch => {
                let a = f64::powf(10.0, self.gain as f64 / 40.0);
                (
                    1.0 + alpha * a,
                    -2.0 * cos_w0,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_w0,
                    1.0 - alpha / a,
                )
            }
            BiquadFilterType::AllPass => (
                1.0 - alpha,
                -2.0 * cos_w0,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Direct form I biquad filter, carrying two samples of input and output history.
///
/// Filters get created per grain, so no state is shared across grains.
#[derive(Debug, Default, Clone)]
pub struct BiquadFilter {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process helper function that calls `process_sample` for each sample in a buffer.
    #[inline]
    pub fn process<'a>(
        &mut self,
        coefficients: &BiquadFilterCoefficients,
        output: impl Iterator<Item = &'a mut f32>,
    ) {
        for sample in output {
            *sample = self.process_sample(coefficients, *sample as f64) as f32;
        }
    }

    /// Apply the filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, coefficients: &BiquadFilterCoefficients, input: f64) -> f64 {
        let c = coefficients;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2
            - c.a1 * self.y1
            - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    /// Reset the filter's history.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    #[test]
    fn invalid_parameters() {
        use BiquadFilterType::*;
        assert!(BiquadFilterCoefficients::new(LowPass, 0, 1000.0, 0.7, 0.0).is_err());
        assert!(BiquadFilterCoefficients::new(LowPass, 44100, 30000.0, 0.7, 0.0).is_err());
        assert!(BiquadFilterCoefficients::new(LowPass, 44100, 1000.0, 0.0, 0.0).is_err());
        assert!(BiquadFilterCoefficients::new(PeakNotch, 44100, 1000.0, 1.0, f32::NAN).is_err());
        for filter_type in BiquadFilterType::iter() {
            assert!(BiquadFilterCoefficients::new(filter_type, 44100, 1000.0, 0.7, 6.0).is_ok());
        }
    }

    #[test]
    fn frequency_response() -> Result<(), Error> {
        let sample_rate = 44100;
        let low = sine(100.0, sample_rate, 8192);
        let high = sine(10000.0, sample_rate, 8192);

        let filter_rms = |filter_type, input: &[f32]| -> Result<f32, Error> {
            let coefficients =
                BiquadFilterCoefficients::new(filter_type, sample_rate, 1000.0, 0.707, -24.0)?;
            let mut filter = BiquadFilter::new();
            let mut output = input.to_vec();
            filter.process(&coefficients, output.iter_mut());
            Ok(rms(&output[1024..]))
        };

        let input_rms = rms(&low[1024..]);
        assert!(filter_rms(BiquadFilterType::LowPass, &low)? > input_rms * 0.9);
        assert!(filter_rms(BiquadFilterType::LowPass, &high)? < input_rms * 0.05);
        assert!(filter_rms(BiquadFilterType::HiPass, &low)? < input_rms * 0.05);
        assert!(filter_rms(BiquadFilterType::HiPass, &high)? > input_rms * 0.9);
        assert!(filter_rms(BiquadFilterType::AllPass, &high)? > input_rms * 0.95);
        assert!(filter_rms(BiquadFilterType::AllPass, &high)? < input_rms * 1.05);

        let center = sine(1000.0, sample_rate, 8192);
        assert!(filter_rms(BiquadFilterType::BandPass, &center)? > input_rms * 0.9);
        assert!(filter_rms(BiquadFilterType::PeakNotch, &center)? < input_rms * 0.1);
        Ok(())
    }
}
