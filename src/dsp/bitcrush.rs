use crate::{utils::lerp, Error};

use super::{validate_mix, DspContext, DspProcessor};

// -------------------------------------------------------------------------------------------------

/// Sample rate and bit depth reduction.
///
/// Holds every `hold_samples`th input sample for `hold_samples` output samples, optionally
/// quantized to `bit_depth` bits, and crossfades the result with the dry signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitcrushEffect {
    /// Number of output samples each held sample lasts. 1 disables the rate reduction.
    pub hold_samples: u32,
    /// Quantization bit depth. Values >= 24 disable the quantization.
    pub bit_depth: u8,
    pub mix: f32,
}

impl Default for BitcrushEffect {
    fn default() -> Self {
        Self {
            hold_samples: 8,
            bit_depth: 8,
            mix: 1.0,
        }
    }
}

impl BitcrushEffect {
    pub const MAX_HOLD_SAMPLES: u32 = 1024;

    pub fn new(hold_samples: u32, bit_depth: u8, mix: f32) -> Self {
        Self {
            hold_samples,
            bit_depth,
            mix,
        }
    }

    #[inline]
    fn quantize(&self, value: f32) -> f32 {
        if self.bit_depth >= 24 {
            value
        } else {
            let levels = (1u32 << (self.bit_depth - 1)) as f32;
            ((value * levels).round() / levels).clamp(-1.0, 1.0)
        }
    }
}

impl DspProcessor for BitcrushEffect {
    fn name(&self) -> &'static str {
        "Bitcrush"
    }

    fn prepare(&mut self, _sample_rate: u32) -> Result<(), Error> {
        if !(1..=Self::MAX_HOLD_SAMPLES).contains(&self.hold_samples) {
            return Err(Error::ParameterError(format!(
                "Bitcrush hold samples must be in range 1..={}, but is {}",
                Self::MAX_HOLD_SAMPLES,
                self.hold_samples
            )));
        }
        if self.bit_depth == 0 {
            return Err(Error::ParameterError(
                "Bitcrush bit depth must be > 0".to_string(),
            ));
        }
        validate_mix(self.name(), self.mix)
    }

    fn process(&self, _context: &DspContext, audio: &mut [f32], _scratch: &mut [f32]) {
        let hold = self.hold_samples.max(1) as usize;
        let mut held = 0.0;
        for (index, sample) in audio.iter_mut().enumerate() {
            if index % hold == 0 {
                held = self.quantize(*sample);
            }
            *sample = lerp(*sample, held, self.mix);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context(len: usize) -> DspContext {
        DspContext {
            sample_rate: 44100,
            grain_len: len,
            start_time: 0,
            seed: 0,
        }
    }

    #[test]
    fn sample_and_hold() {
        let mut audio = (0..8).map(|i| i as f32 / 8.0).collect::<Vec<_>>();
        let mut scratch = vec![0.0; 8];
        let effect = BitcrushEffect::new(4, 24, 1.0);
        effect.process(&context(8), &mut audio, &mut scratch);
        assert_eq!(audio, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn quantize_and_mix() {
        let mut audio = vec![0.3; 4];
        let mut scratch = vec![0.0; 4];
        // 2 bits: levels at multiples of 0.5
        let effect = BitcrushEffect::new(1, 2, 0.5);
        effect.process(&context(4), &mut audio, &mut scratch);
        assert!(audio.iter().all(|s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn validation() {
        assert!(BitcrushEffect::default().prepare(44100).is_ok());
        assert!(BitcrushEffect::new(0, 8, 1.0).prepare(44100).is_err());
        assert!(BitcrushEffect::new(4, 0, 1.0).prepare(44100).is_err());
        assert!(BitcrushEffect::new(4, 8, 1.5).prepare(44100).is_err());
        assert!(!BitcrushEffect::default().is_delay_based());
        assert_eq!(BitcrushEffect::default().tail_samples(44100), 0);
    }
}
