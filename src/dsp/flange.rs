use std::f64::consts::TAU;

use crate::{utils::time::ms_to_samples, Error};

use super::{validate_mix, DspContext, DspProcessor};

// -------------------------------------------------------------------------------------------------

/// Flanger: a short, sine modulated delay with feedback.
///
/// The delayed signal is scattered ahead into the scratch buffer with linear interpolation,
/// which requires a DSP tail of the max delay time. The LFO phase is derived from the grain's
/// absolute start time, so overlapping grains of an emitter share a single coherent sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlangeEffect {
    /// Minimum delay time in milliseconds.
    pub delay_ms: f32,
    /// LFO modulation depth in milliseconds.
    pub depth_ms: f32,
    /// LFO rate in Hz.
    pub rate_hz: f32,
    /// Amount of the delayed signal fed back into the delay, -0.95..=0.95.
    pub feedback: f32,
    pub mix: f32,
}

impl Default for FlangeEffect {
    fn default() -> Self {
        Self {
            delay_ms: 1.0,
            depth_ms: 3.0,
            rate_hz: 0.5,
            feedback: 0.5,
            mix: 1.0,
        }
    }
}

impl FlangeEffect {
    pub const MAX_DELAY_MS: f32 = 50.0;
    pub const MAX_FEEDBACK: f32 = 0.95;
}

impl DspProcessor for FlangeEffect {
    fn name(&self) -> &'static str {
        "Flange"
    }

    fn is_delay_based(&self) -> bool {
        true
    }

    fn tail_samples(&self, sample_rate: u32) -> usize {
        let max_delay = ms_to_samples(self.delay_ms + self.depth_ms, sample_rate);
        if max_delay.is_finite() {
            max_delay.max(0.0).ceil() as usize + 2
        } else {
            0
        }
    }

    fn prepare(&mut self, _sample_rate: u32) -> Result<(), Error> {
        if !(self.delay_ms >= 0.0 && self.depth_ms >= 0.0)
            || self.delay_ms + self.depth_ms > Self::MAX_DELAY_MS
        {
            return Err(Error::ParameterError(format!(
                "Flange delay and depth must be >= 0 and sum up to <= {} ms",
                Self::MAX_DELAY_MS
            )));
        }
        if !(self.rate_hz >= 0.0 && self.rate_hz.is_finite()) {
            return Err(Error::ParameterError(format!(
                "Flange rate must be >= 0 Hz, but is {}",
                self.rate_hz
            )));
        }
        if !(self.feedback.abs() <= Self::MAX_FEEDBACK) {
            return Err(Error::ParameterError(format!(
                "Flange feedback must be in range -{max}..={max}, but is {}",
                self.feedback,
                max = Self::MAX_FEEDBACK
            )));
        }
        validate_mix(self.name(), self.mix)
    }

    fn process(&self, context: &DspContext, audio: &mut [f32], scratch: &mut [f32]) {
        let len = audio.len().min(scratch.len());
        let sample_rate = context.sample_rate as f64;
        let base_delay = ms_to_samples(self.delay_ms, context.sample_rate) as f64;
        let depth = ms_to_samples(self.depth_ms, context.sample_rate) as f64;

        let phase_step = TAU * self.rate_hz as f64 / sample_rate;
        let start_phase = (context.start_time as f64 * self.rate_hz as f64 / sample_rate).fract();
        let start_phase = start_phase * TAU;

        let dry_amount = 1.0 - self.mix * 0.5;
        let wet_amount = self.mix * 0.5;
        for index in 0..len {
            let input = audio[index];
            let delayed = scratch[index];

            // write input and feedback ahead into the delay line
            let lfo = 0.5 * (1.0 + (start_phase + phase_step * index as f64).sin());
            let write_pos = index as f64 + 1.0 + base_delay + depth * lfo;
            let write_index = write_pos as usize;
            let fraction = (write_pos - write_index as f64) as f32;
            let value = input + delayed * self.feedback;
            if write_index < len {
                scratch[write_index] += value * (1.0 - fraction);
            }
            if write_index + 1 < len {
                scratch[write_index + 1] += value * fraction;
            }

            audio[index] = input * dry_amount + delayed * wet_amount;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context(start_time: u64, len: usize) -> DspContext {
        DspContext {
            sample_rate: 1000,
            grain_len: len,
            start_time,
            seed: 0,
        }
    }

    #[test]
    fn static_delay() {
        // 10ms delay without modulation and feedback at 1kHz: an impulse echo after 11 samples
        let effect = FlangeEffect {
            delay_ms: 10.0,
            depth_ms: 0.0,
            rate_hz: 0.0,
            feedback: 0.0,
            mix: 1.0,
        };
        assert!(effect.is_delay_based());
        assert_eq!(effect.tail_samples(1000), 12);

        let mut audio = vec![0.0; 32];
        audio[0] = 1.0;
        let mut scratch = vec![0.0; 32];
        effect.process(&context(0, 20), &mut audio, &mut scratch);
        assert_eq!(audio[0], 0.5);
        assert_eq!(audio[11], 0.5);
        assert_eq!(audio.iter().filter(|s| **s != 0.0).count(), 2);
    }

    #[test]
    fn feedback_repeats() {
        let effect = FlangeEffect {
            delay_ms: 4.0,
            depth_ms: 0.0,
            rate_hz: 0.0,
            feedback: 0.5,
            mix: 1.0,
        };
        let mut audio = vec![0.0; 64];
        audio[0] = 1.0;
        let mut scratch = vec![0.0; 64];
        effect.process(&context(0, 64), &mut audio, &mut scratch);
        assert_eq!(audio[5], 0.5);
        assert_eq!(audio[10], 0.25);
        assert_eq!(audio[15], 0.125);
    }

    #[test]
    fn phase_follows_start_time() {
        let effect = FlangeEffect {
            rate_hz: 10.0,
            ..FlangeEffect::default()
        };
        let input = (0..200).map(|i| ((i * 7) % 13) as f32 / 13.0).collect::<Vec<_>>();
        let render = |start_time: u64| {
            let mut audio = input.clone();
            let mut scratch = vec![0.0; audio.len()];
            effect.process(&context(start_time, 200), &mut audio, &mut scratch);
            audio
        };
        // a full LFO cycle is 100 samples: equal phases render equally
        assert_eq!(render(0), render(100));
        assert_ne!(render(0), render(25));
    }

    #[test]
    fn validation() {
        assert!(FlangeEffect::default().prepare(44100).is_ok());
        let mut too_long = FlangeEffect {
            delay_ms: 40.0,
            depth_ms: 20.0,
            ..FlangeEffect::default()
        };
        assert!(too_long.prepare(44100).is_err());
        let mut unstable = FlangeEffect {
            feedback: 1.0,
            ..FlangeEffect::default()
        };
        assert!(unstable.prepare(44100).is_err());
    }
}
