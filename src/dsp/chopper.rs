use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::Error;

use super::{validate_mix, DspContext, DspProcessor};

// -------------------------------------------------------------------------------------------------

/// Order in which the chopper replays recorded segments.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum ChopperOrder {
    #[default]
    Forward,
    Reverse,
    /// Random walk: step one segment forward or backward.
    Walk,
    Random,
}

/// How the chopper changes the playback speed of replayed segments.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum ChopperPitch {
    /// Replay segments at their original speed.
    #[default]
    Normal,
    /// Rise by `pitch_amount` octaves over the course of the grain.
    Ascending,
    /// Fall by `pitch_amount` octaves over the course of the grain.
    Descending,
    /// Random speed per segment, up to `pitch_amount` octaves up or down.
    Pitched,
}

// -------------------------------------------------------------------------------------------------

/// Granular re-sequencer.
///
/// The first pass splits the grain into segments at every `crossings_per_segment`th zero
/// crossing, storing the dry signal and a segment table in the scratch buffer. The segment table
/// lives in the scratch buffer's DSP tail, two slots (offset, length) per segment. The second
/// pass fills the grain by replaying the segments in the configured order and pitch mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChopperEffect {
    pub crossings_per_segment: u32,
    pub max_segments: u32,
    pub order: ChopperOrder,
    pub pitch: ChopperPitch,
    /// Pitch range in octaves for all pitch modes but `Normal`.
    pub pitch_amount: f32,
    pub mix: f32,
}

impl Default for ChopperEffect {
    fn default() -> Self {
        Self {
            crossings_per_segment: 4,
            max_segments: 32,
            order: ChopperOrder::Reverse,
            pitch: ChopperPitch::Normal,
            pitch_amount: 1.0,
            mix: 1.0,
        }
    }
}

impl ChopperEffect {
    pub const MAX_SEGMENTS: u32 = 512;
    pub const MAX_PITCH_AMOUNT: f32 = 4.0;

    /// Split the dry signal into segments, copying it into the scratch buffer and writing the
    /// segment table into the scratch buffer's tail. Returns the number of recorded segments.
    fn record_segments(&self, dry: &[f32], scratch: &mut [f32]) -> usize {
        let grain_len = dry.len();
        let (signal, table) = scratch.split_at_mut(grain_len);
        signal.copy_from_slice(dry);

        let max_segments = (self.max_segments as usize).min(table.len() / 2);
        if max_segments == 0 || grain_len == 0 {
            return 0;
        }
        let crossings_per_segment = self.crossings_per_segment.max(1);

        let mut segment_count = 0;
        let mut segment_start = 0;
        let mut crossings = 0;
        for index in 1..grain_len {
            // the last slot takes the remainder
            if segment_count + 1 >= max_segments {
                break;
            }
            let (previous, current) = (dry[index - 1], dry[index]);
            if (previous < 0.0) != (current < 0.0) {
                crossings += 1;
                if crossings == crossings_per_segment {
                    table[segment_count * 2] = segment_start as f32;
                    table[segment_count * 2 + 1] = (index - segment_start) as f32;
                    segment_count += 1;
                    segment_start = index;
                    crossings = 0;
                }
            }
        }
        table[segment_count * 2] = segment_start as f32;
        table[segment_count * 2 + 1] = (grain_len - segment_start) as f32;
        segment_count + 1
    }

    fn next_segment(
        &self,
        played: usize,
        current: usize,
        segment_count: usize,
        rng: &mut SmallRng,
    ) -> usize {
        match self.order {
            ChopperOrder::Forward => played % segment_count,
            ChopperOrder::Reverse => segment_count - 1 - played % segment_count,
            ChopperOrder::Walk => {
                if played == 0 || segment_count == 1 {
                    current.min(segment_count - 1)
                } else if current == 0 {
                    1
                } else if current + 1 >= segment_count || rng.random::<bool>() {
                    current - 1
                } else {
                    current + 1
                }
            }
            ChopperOrder::Random => rng.random_range(0..segment_count),
        }
    }

    fn segment_speed(&self, progress: f32, rng: &mut SmallRng) -> f64 {
        let octaves = match self.pitch {
            ChopperPitch::Normal => 0.0,
            ChopperPitch::Ascending => self.pitch_amount * progress,
            ChopperPitch::Descending => -self.pitch_amount * progress,
            ChopperPitch::Pitched => {
                if self.pitch_amount > 0.0 {
                    rng.random_range(-self.pitch_amount..=self.pitch_amount)
                } else {
                    0.0
                }
            }
        };
        2.0f64.powf(octaves as f64)
    }
}

impl DspProcessor for ChopperEffect {
    fn name(&self) -> &'static str {
        "Chopper"
    }

    /// Reserved space for the segment table.
    fn tail_samples(&self, _sample_rate: u32) -> usize {
        2 * self.max_segments as usize
    }

    fn prepare(&mut self, _sample_rate: u32) -> Result<(), Error> {
        if self.crossings_per_segment == 0 {
            return Err(Error::ParameterError(
                "Chopper needs at least one zero crossing per segment".to_string(),
            ));
        }
        if !(1..=Self::MAX_SEGMENTS).contains(&self.max_segments) {
            return Err(Error::ParameterError(format!(
                "Chopper max segments must be in range 1..={}, but is {}",
                Self::MAX_SEGMENTS,
                self.max_segments
            )));
        }
        if !(0.0..=Self::MAX_PITCH_AMOUNT).contains(&self.pitch_amount) {
            return Err(Error::ParameterError(format!(
                "Chopper pitch amount must be in range 0..={}, but is {}",
                Self::MAX_PITCH_AMOUNT,
                self.pitch_amount
            )));
        }
        validate_mix(self.name(), self.mix)
    }

    fn process(&self, context: &DspContext, audio: &mut [f32], scratch: &mut [f32]) {
        let grain_len = context.grain_len.min(audio.len()).min(scratch.len());
        let segment_count = self.record_segments(&audio[..grain_len], scratch);
        if segment_count == 0 {
            return;
        }
        let (signal, table) = scratch.split_at(grain_len);
        let segment = |index: usize| {
            let offset = table[index * 2] as usize;
            let len = (table[index * 2 + 1] as usize).max(1);
            &signal[offset..(offset + len).min(grain_len)]
        };

        let mut rng = SmallRng::seed_from_u64(context.seed ^ context.start_time);
        let mut output = 0;
        let mut played = 0;
        let mut current = 0;
        while output < grain_len {
            current = self.next_segment(played, current, segment_count, &mut rng);
            let samples = segment(current);
            let speed = self.segment_speed(output as f32 / grain_len as f32, &mut rng);
            let mut position = 0.0f64;
            while output < grain_len && position < samples.len() as f64 {
                let index = position as usize;
                let fraction = (position - index as f64) as f32;
                let wet = if index + 1 < samples.len() {
                    samples[index] * (1.0 - fraction) + samples[index + 1] * fraction
                } else {
                    samples[index]
                };
                let dry = signal[output];
                audio[output] = dry + (wet - dry) * self.mix;
                output += 1;
                position += speed;
            }
            played += 1;
        }
    }
}

// -------------------------------------------------------------------------------------------------
