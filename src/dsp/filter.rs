use crate::{utils::lerp, Error};

use super::{
    biquad::{BiquadFilter, BiquadFilterCoefficients, BiquadFilterType},
    validate_mix, DspContext, DspProcessor,
};

// -------------------------------------------------------------------------------------------------

/// Biquad filter with a dry/wet mix.
///
/// Coefficients are calculated once when the effect gets prepared for the engine's sample rate.
/// Each grain runs its own filter instance, so filter history never bleeds across grains.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterEffect {
    pub filter_type: BiquadFilterType,
    /// Cutoff or center frequency in Hz.
    pub cutoff: f32,
    pub q: f32,
    /// Gain in dB, used by peak/notch filters only.
    pub gain: f32,
    pub mix: f32,
    coefficients: BiquadFilterCoefficients,
}

impl Default for FilterEffect {
    fn default() -> Self {
        Self::new(BiquadFilterType::LowPass, 1000.0, 0.707)
    }
}

impl FilterEffect {
    pub fn new(filter_type: BiquadFilterType, cutoff: f32, q: f32) -> Self {
        Self {
            filter_type,
            cutoff,
            q,
            gain: 0.0,
            mix: 1.0,
            coefficients: BiquadFilterCoefficients::default(),
        }
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn mix(mut self, mix: f32) -> Self {
        self.mix = mix;
        self
    }
}

impl DspProcessor for FilterEffect {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn prepare(&mut self, sample_rate: u32) -> Result<(), Error> {
        validate_mix(self.name(), self.mix)?;
        self.coefficients
            .set(self.filter_type, sample_rate, self.cutoff, self.q, self.gain)
    }

    fn process(&self, _context: &DspContext, audio: &mut [f32], _scratch: &mut [f32]) {
        let mut filter = BiquadFilter::new();
        for sample in audio.iter_mut() {
            let wet = filter.process_sample(&self.coefficients, *sample as f64) as f32;
            *sample = lerp(*sample, wet, self.mix);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grains_do_not_share_history() -> Result<(), Error> {
        let mut effect = FilterEffect::new(BiquadFilterType::LowPass, 500.0, 0.707);
        effect.prepare(44100)?;
        let context = DspContext {
            sample_rate: 44100,
            grain_len: 64,
            start_time: 0,
            seed: 0,
        };
        let input = (0..64).map(|i| (i as f32 * 0.3).sin()).collect::<Vec<_>>();
        let mut scratch = vec![0.0; 64];

        let mut first = input.clone();
        effect.process(&context, &mut first, &mut scratch);
        let mut second = input.clone();
        effect.process(&context, &mut second, &mut scratch);
        assert_eq!(first, second);
        assert_ne!(first, input);
        Ok(())
    }

    #[test]
    fn dry_mix() -> Result<(), Error> {
        let mut effect = FilterEffect::new(BiquadFilterType::HiPass, 2000.0, 1.0).mix(0.0);
        effect.prepare(48000)?;
        let context = DspContext {
            sample_rate: 48000,
            grain_len: 16,
            start_time: 0,
            seed: 0,
        };
        let input = vec![0.25; 16];
        let mut audio = input.clone();
        effect.process(&context, &mut audio, &mut vec![0.0; 16]);
        assert_eq!(audio, input);
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        assert!(FilterEffect::new(BiquadFilterType::LowPass, 30000.0, 1.0)
            .prepare(44100)
            .is_err());
        assert!(FilterEffect::default().mix(-1.0).prepare(44100).is_err());
    }
}
