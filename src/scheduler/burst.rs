use rand::Rng;

use crate::{
    modulation::Modulator,
    utils::time::{ms_to_samples, SampleTime},
};

use super::{GrainDescriptor, GrainModulators, GrainTarget, ScheduleContext};

// -------------------------------------------------------------------------------------------------

/// Summary of a triggered burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BurstInfo {
    /// Audio clock time the burst got triggered at.
    pub trigger_time: SampleTime,
    /// Random start delay applied to all grains of the burst.
    pub jitter: u64,
    /// Burst length in sample frames.
    pub length: u64,
    /// Number of audible grains the burst produced.
    pub grain_count: usize,
}

// -------------------------------------------------------------------------------------------------

/// Schedules a fixed length burst of grains when triggered by a collision.
///
/// All grains of a burst are scheduled at once, spread over the burst's length. Parameters are
/// resolved with their time shaped variant, so they move from their start to their end value
/// over the course of the burst.
#[derive(Debug, Clone)]
pub(crate) struct BurstScheduler {
    trigger_threshold: f32,
    last_trigger: Option<SampleTime>,
}

impl BurstScheduler {
    pub fn new(trigger_threshold: f32) -> Self {
        Self {
            trigger_threshold,
            last_trigger: None,
        }
    }

    /// Test if a collision with the given force would trigger a burst at time `now`.
    pub fn accepts(&self, force: f32, context: &ScheduleContext) -> bool {
        if !(force >= self.trigger_threshold) {
            return false;
        }
        match self.last_trigger {
            Some(last) => context.now >= last + context.burst_debounce_samples,
            None => true,
        }
    }

    /// Trigger a burst when the collision qualifies, pushing all its audible grains.
    ///
    /// Returns `None` when the collision got rejected because its force is below the trigger
    /// threshold or the emitter is still debouncing a previous burst.
    #[allow(clippy::too_many_arguments)]
    pub fn trigger<R: Rng>(
        &mut self,
        force: f32,
        context: &ScheduleContext,
        modulators: &mut GrainModulators,
        length: &mut Modulator,
        target: &GrainTarget,
        rng: &mut R,
        grains: &mut Vec<GrainDescriptor>,
    ) -> Option<BurstInfo> {
        if !self.accepts(force, context) {
            return None;
        }
        self.last_trigger = Some(context.now);

        // hold noise values constant for the whole burst
        modulators.lock_noise(rng);
        length.lock_noise(rng);

        let length_samples = ms_to_samples(length.value(rng), context.sample_rate).round();
        let length_samples = if length_samples.is_finite() {
            length_samples.max(0.0) as u64
        } else {
            0
        };
        let jitter = if context.burst_start_offset_range_samples > 0 {
            rng.random_range(0..=context.burst_start_offset_range_samples)
        } else {
            0
        };

        let total_len = length_samples as f64;
        let mut offset = jitter as f64;
        let mut iterations = 0;
        let mut grain_count = 0;
        while offset < total_len && iterations < context.max_grains_per_burst {
            let progress = (offset / total_len) as f32;
            let values = modulators.time_shaped_values(progress, rng);
            let duration = context.duration_samples(values.duration_ms);
            let start_time = context.now + offset.round() as SampleTime;
            if let Some(grain) = values.descriptor(start_time, duration, target, context) {
                grains.push(grain);
                grain_count += 1;
            }
            offset += values.offset_samples(duration);
            iterations += 1;
        }

        modulators.unlock_noise();
        length.unlock_noise();

        Some(BurstInfo {
            trigger_time: context.now,
            jitter,
            length: length_samples,
            grain_count,
        })
    }
}

// -------------------------------------------------------------------------------------------------
