//! Per-grain DSP effects and the emitter's effect chain.

use crate::{renderer::GrainBuffer, utils::time::SampleTime, Error};

// -------------------------------------------------------------------------------------------------

pub mod biquad;
pub mod bitcrush;
pub mod chopper;
pub mod filter;
pub mod flange;

pub use biquad::{BiquadFilter, BiquadFilterCoefficients, BiquadFilterType};
pub use bitcrush::BitcrushEffect;
pub use chopper::{ChopperEffect, ChopperOrder, ChopperPitch};
pub use filter::FilterEffect;
pub use flange::FlangeEffect;

// -------------------------------------------------------------------------------------------------

/// Properties of the grain an effect processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DspContext {
    pub sample_rate: u32,
    /// Length of the grain without the DSP tail.
    pub grain_len: usize,
    /// Absolute start time of the grain in sample frames.
    pub start_time: SampleTime,
    /// Per emitter seed for effects with random behavior.
    pub seed: u64,
}

// -------------------------------------------------------------------------------------------------

/// Interface of all grain effects.
///
/// Effects process a single grain in place. All state an effect needs lives on the stack of
/// [`process`](Self::process) or in the scratch buffer, so grains never share effect history.
pub trait DspProcessor {
    /// Name of the effect for error messages.
    fn name(&self) -> &'static str;

    /// True for effects which need a DSP tail to let delayed signals ring out.
    fn is_delay_based(&self) -> bool {
        false
    }

    /// Required number of extra sample frames after the grain.
    fn tail_samples(&self, _sample_rate: u32) -> usize {
        0
    }

    /// Validate parameters and precompute sample rate dependent values.
    fn prepare(&mut self, sample_rate: u32) -> Result<(), Error>;

    /// Process a grain. `audio` and `scratch` have equal lengths: the grain's length plus the
    /// grain's DSP tail. The scratch buffer is zeroed before each effect.
    fn process(&self, context: &DspContext, audio: &mut [f32], scratch: &mut [f32]);
}

/// Shared mix parameter validation.
pub(crate) fn validate_mix(name: &str, mix: f32) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&mix) {
        return Err(Error::ParameterError(format!(
            "{name} mix must be in range 0..=1, but is {mix}"
        )));
    }
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// A single effect in an emitter's DSP chain.
#[derive(Debug, Clone, PartialEq)]
pub enum DspEffect {
    Bitcrush(BitcrushEffect),
    Filter(FilterEffect),
    Flange(FlangeEffect),
    Chopper(ChopperEffect),
}

impl DspEffect {
    fn processor(&self) -> &dyn DspProcessor {
        match self {
            Self::Bitcrush(effect) => effect,
            Self::Filter(effect) => effect,
            Self::Flange(effect) => effect,
            Self::Chopper(effect) => effect,
        }
    }

    fn processor_mut(&mut self) -> &mut dyn DspProcessor {
        match self {
            Self::Bitcrush(effect) => effect,
            Self::Filter(effect) => effect,
            Self::Flange(effect) => effect,
            Self::Chopper(effect) => effect,
        }
    }

    pub fn name(&self) -> &'static str {
        self.processor().name()
    }

    pub fn is_delay_based(&self) -> bool {
        self.processor().is_delay_based()
    }

    pub fn tail_samples(&self, sample_rate: u32) -> usize {
        self.processor().tail_samples(sample_rate)
    }
}

impl From<BitcrushEffect> for DspEffect {
    fn from(effect: BitcrushEffect) -> Self {
        Self::Bitcrush(effect)
    }
}

impl From<FilterEffect> for DspEffect {
    fn from(effect: FilterEffect) -> Self {
        Self::Filter(effect)
    }
}

impl From<FlangeEffect> for DspEffect {
    fn from(effect: FlangeEffect) -> Self {
        Self::Flange(effect)
    }
}

impl From<ChopperEffect> for DspEffect {
    fn from(effect: ChopperEffect) -> Self {
        Self::Chopper(effect)
    }
}

// -------------------------------------------------------------------------------------------------

/// An emitter's prepared, ordered list of grain effects.
#[derive(Debug, Clone, Default)]
pub(crate) struct DspChain {
    effects: Vec<DspEffect>,
    tail_samples: usize,
}

impl DspChain {
    /// Validate and prepare all effects for the given sample rate.
    pub fn new(mut effects: Vec<DspEffect>, sample_rate: u32) -> Result<Self, Error> {
        for effect in &mut effects {
            effect.processor_mut().prepare(sample_rate)?;
        }
        let tail_samples = effects
            .iter()
            .map(|effect| effect.tail_samples(sample_rate))
            .max()
            .unwrap_or(0);
        Ok(Self {
            effects,
            tail_samples,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Longest DSP tail of all effects in the chain.
    pub fn tail_samples(&self) -> usize {
        self.tail_samples
    }

    /// Estimated relative processing cost per grain sample.
    pub fn weight(&self) -> usize {
        self.effects.len()
    }

    /// Apply all effects in order to a rendered grain.
    pub fn process(&self, context: &DspContext, buffer: &mut GrainBuffer) {
        let (audio, scratch) = buffer.split_mut();
        for effect in &self.effects {
            scratch.fill(0.0);
            effect.processor().process(context, audio, scratch);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{renderer::render_grain, scheduler::GrainDescriptor};

    #[test]
    fn chain_tail() -> Result<(), Error> {
        let chain = DspChain::new(
            vec![
                FilterEffect::new(BiquadFilterType::BandPass, 100.0, 2.0).into(),
                FlangeEffect::default().into(),
                ChopperEffect {
                    max_segments: 8,
                    ..ChopperEffect::default()
                }
                .into(),
            ],
            1000,
        )?;
        // flange: 4ms at 1kHz + 2, chopper: 2 * 8
        assert_eq!(chain.tail_samples(), 16);
        assert!(DspChain::new(vec![], 1000)?.tail_samples() == 0);
        Ok(())
    }

    #[test]
    fn invalid_chain() {
        assert!(DspChain::new(
            vec![FilterEffect::new(BiquadFilterType::LowPass, 40000.0, 1.0).into()],
            44100
        )
        .is_err());
    }

    #[test]
    fn chain_processing() -> Result<(), Error> {
        let sample_rate = 1000;
        let chain = DspChain::new(
            vec![
                FlangeEffect {
                    delay_ms: 3.0,
                    depth_ms: 0.0,
                    rate_hz: 0.0,
                    feedback: 0.0,
                    mix: 1.0,
                }
                .into(),
                BitcrushEffect::new(1, 24, 1.0).into(),
            ],
            sample_rate,
        )?;
        let source = vec![1.0; 16];
        let grain = GrainDescriptor {
            clip: 0,
            playhead: 0.0,
            sample_count: 8,
            pitch: 1.0,
            volume: 1.0,
            start_time: 0,
            dsp_tail: chain.tail_samples(),
            speaker: None,
            reflect_at_boundary: false,
        };
        let mut buffer = GrainBuffer::with_capacity(64);
        render_grain(&grain, &source, &[1.0], &mut buffer);
        let context = DspContext {
            sample_rate,
            grain_len: grain.sample_count,
            start_time: grain.start_time,
            seed: 0,
        };
        chain.process(&context, &mut buffer);
        // the echo rings out into the tail
        assert_eq!(buffer.len(), 8 + 5);
        assert_eq!(buffer.audio()[0], 0.5);
        assert_eq!(buffer.audio()[4], 1.0);
        assert_eq!(buffer.audio()[8], 0.5);
        assert_eq!(buffer.audio()[11], 0.5);
        assert_eq!(buffer.audio()[12], 0.0);
        Ok(())
    }
}
