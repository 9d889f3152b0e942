//! Sample accurate grain scheduling for continuous and burst emitters.

use rand::Rng;

use crate::{
    config::EngineConfig,
    modulation::{InteractionValues, Modulator},
    utils::{
        clamp01,
        time::{ms_to_samples, SampleTime},
    },
    ClipId, SpeakerId,
};

// -------------------------------------------------------------------------------------------------

pub(crate) mod burst;
pub(crate) mod continuous;

pub(crate) use burst::BurstScheduler;
pub(crate) use continuous::ContinuousScheduler;

// -------------------------------------------------------------------------------------------------

/// A scheduled grain: everything needed to render it and hand it over to a speaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainDescriptor {
    /// Source clip to read from.
    pub clip: ClipId,
    /// Normalized read start position in the source clip.
    pub playhead: f32,
    /// Length of the grain in sample frames, without DSP tail.
    pub sample_count: usize,
    /// Playback speed factor.
    pub pitch: f32,
    /// Linear gain.
    pub volume: f32,
    /// Absolute start time in audio clock sample frames.
    pub start_time: SampleTime,
    /// Extra sample frames appended for delay based DSP effects.
    pub dsp_tail: usize,
    /// Speaker the grain gets mixed into, if any.
    pub speaker: Option<SpeakerId>,
    /// Reflect reads at the source clip boundaries instead of truncating the grain.
    pub reflect_at_boundary: bool,
}

impl GrainDescriptor {
    /// Max transpose in octaves in both directions.
    pub const MAX_TRANSPOSE: f32 = 4.0;

    /// Total length of the grain buffer including the DSP tail.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.sample_count + self.dsp_tail
    }

    /// Playback speed for the given transpose value in octaves.
    #[inline]
    pub fn pitch_from_transpose(transpose: f32) -> f32 {
        let transpose = if transpose.is_nan() { 0.0 } else { transpose };
        2.0f32.powf(transpose.clamp(-Self::MAX_TRANSPOSE, Self::MAX_TRANSPOSE))
    }
}

// -------------------------------------------------------------------------------------------------

/// Engine wide scheduling settings, converted to sample frames, plus the current audio clock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScheduleContext {
    pub now: SampleTime,
    pub sample_rate: u32,
    pub lookahead_samples: u64,
    pub discard_threshold_samples: u64,
    pub max_grains_per_tick: usize,
    pub max_grains_per_burst: usize,
    pub max_grain_samples: usize,
    pub audibility_threshold: f32,
    pub burst_debounce_samples: u64,
    pub burst_start_offset_range_samples: u64,
}

impl ScheduleContext {
    pub fn new(config: &EngineConfig, now: SampleTime) -> Self {
        Self {
            now,
            sample_rate: config.sample_rate,
            lookahead_samples: config.queue_lookahead_samples(),
            discard_threshold_samples: config.discard_threshold_samples(),
            max_grains_per_tick: config.max_grains_per_tick,
            max_grains_per_burst: config.max_grains_per_burst,
            max_grain_samples: config.max_grain_samples(),
            audibility_threshold: config.audibility_threshold,
            burst_debounce_samples: (config.burst_debounce_duration as f64
                * config.sample_rate as f64)
                .round() as u64,
            burst_start_offset_range_samples: ms_to_samples(
                config.burst_start_offset_range_ms,
                config.sample_rate,
            )
            .round() as u64,
        }
    }

    /// Convert a grain duration in milliseconds into a valid grain length in sample frames.
    #[inline]
    pub fn duration_samples(&self, duration_ms: f32) -> usize {
        let samples = ms_to_samples(duration_ms, self.sample_rate);
        if samples.is_nan() {
            1
        } else {
            (samples.round() as usize).clamp(1, self.max_grain_samples)
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Per emitter properties which are passed through to every scheduled grain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrainTarget {
    pub clip: ClipId,
    pub speaker: Option<SpeakerId>,
    pub reflect_at_boundary: bool,
    pub dsp_tail: usize,
    /// Additional volume factor, e.g. the age fade.
    pub volume_scale: f32,
}

// -------------------------------------------------------------------------------------------------

/// Resolved parameter values for a single grain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GrainValues {
    pub volume: f32,
    pub playhead: f32,
    pub duration_ms: f32,
    pub density: f32,
    pub transpose: f32,
}

impl GrainValues {
    /// Densities below this value are treated as this value.
    pub const MIN_DENSITY: f32 = 0.1;

    /// Distance to the next grain in (fractional) sample frames, for the given grain length.
    #[inline]
    pub fn offset_samples(&self, duration_samples: usize) -> f64 {
        let density = if self.density.is_nan() {
            Self::MIN_DENSITY
        } else {
            self.density.max(Self::MIN_DENSITY)
        };
        (duration_samples as f64 / density as f64).max(1.0)
    }

    /// Create a grain descriptor from the values if it's audible.
    pub fn descriptor(
        &self,
        start_time: SampleTime,
        duration_samples: usize,
        target: &GrainTarget,
        context: &ScheduleContext,
    ) -> Option<GrainDescriptor> {
        let volume = self.volume * target.volume_scale;
        if !(volume > context.audibility_threshold) {
            return None;
        }
        let sample_count = duration_samples.clamp(1, context.max_grain_samples);
        let dsp_tail = target
            .dsp_tail
            .min(context.max_grain_samples - sample_count);
        Some(GrainDescriptor {
            clip: target.clip,
            playhead: clamp01(self.playhead),
            sample_count,
            pitch: GrainDescriptor::pitch_from_transpose(self.transpose),
            volume,
            start_time,
            dsp_tail,
            speaker: target.speaker,
            reflect_at_boundary: target.reflect_at_boundary,
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Modulators for all per-grain parameters of an emitter.
#[derive(Debug, Clone)]
pub(crate) struct GrainModulators {
    pub volume: Modulator,
    pub playhead: Modulator,
    pub duration: Modulator,
    pub density: Modulator,
    pub transpose: Modulator,
}

impl GrainModulators {
    fn all_mut(&mut self) -> [&mut Modulator; 5] {
        [
            &mut self.volume,
            &mut self.playhead,
            &mut self.duration,
            &mut self.density,
            &mut self.transpose,
        ]
    }

    /// Feed the latest interaction values into all modulators.
    pub fn update(&mut self, inputs: &InteractionValues, delta_time: f32) {
        for modulator in self.all_mut() {
            let raw = inputs.get(modulator.parameter().input);
            modulator.update(raw, delta_time);
        }
    }

    pub fn values<R: Rng>(&self, rng: &mut R) -> GrainValues {
        GrainValues {
            volume: self.volume.value(rng),
            playhead: self.playhead.value(rng),
            duration_ms: self.duration.value(rng),
            density: self.density.value(rng),
            transpose: self.transpose.value(rng),
        }
    }

    pub fn time_shaped_values<R: Rng>(&self, progress: f32, rng: &mut R) -> GrainValues {
        GrainValues {
            volume: self.volume.time_shaped_value(progress, rng),
            playhead: self.playhead.time_shaped_value(progress, rng),
            duration_ms: self.duration.time_shaped_value(progress, rng),
            density: self.density.time_shaped_value(progress, rng),
            transpose: self.transpose.time_shaped_value(progress, rng),
        }
    }

    pub fn lock_noise<R: Rng>(&mut self, rng: &mut R) {
        for modulator in self.all_mut() {
            modulator.lock_noise(rng);
        }
    }

    pub fn unlock_noise(&mut self) {
        for modulator in self.all_mut() {
            modulator.unlock_noise();
        }
    }
}

// -------------------------------------------------------------------------------------------------
