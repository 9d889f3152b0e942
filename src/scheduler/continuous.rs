use rand::Rng;

use crate::utils::time::SampleTime;

use super::{GrainDescriptor, GrainModulators, GrainTarget, ScheduleContext};

// -------------------------------------------------------------------------------------------------

/// Schedules an endless stream of grains ahead of the audio clock.
///
/// The scheduler keeps a fractional cursor to the next grain's start time. Each tick it fills the
/// time span up to `now + lookahead` with grains, spacing them by `duration / density`. Grains
/// below the audibility threshold are skipped but still advance the cursor, so spacing stays
/// intact across silent periods.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContinuousScheduler {
    next_grain_start: Option<f64>,
}

impl ContinuousScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start time of the next grain, if the scheduler ran at least once.
    #[cfg(test)]
    pub fn next_grain_start(&self) -> Option<SampleTime> {
        self.next_grain_start.map(|start| start.round() as SampleTime)
    }

    /// Restart scheduling from the audio clock on the next run.
    pub fn reset(&mut self) {
        self.next_grain_start = None;
    }

    /// Schedule all due grains and push audible ones into `grains`.
    ///
    /// Returns the number of pushed grains. Never loops more than `max_grains_per_tick` times.
    pub fn schedule<R: Rng>(
        &mut self,
        context: &ScheduleContext,
        modulators: &GrainModulators,
        target: &GrainTarget,
        rng: &mut R,
        grains: &mut Vec<GrainDescriptor>,
    ) -> usize {
        let now = context.now as f64;
        // restart from now when the cursor fell behind the discard window
        let mut cursor = match self.next_grain_start {
            Some(cursor) if cursor + context.discard_threshold_samples as f64 >= now => cursor,
            _ => now,
        };
        let horizon = now + context.lookahead_samples as f64;

        let mut iterations = 0;
        let mut pushed = 0;
        while cursor <= horizon && iterations < context.max_grains_per_tick {
            let values = modulators.values(rng);
            let duration = context.duration_samples(values.duration_ms);
            let start_time = cursor.round() as SampleTime;
            if let Some(grain) = values.descriptor(start_time, duration, target, context) {
                grains.push(grain);
                pushed += 1;
            }
            cursor += values.offset_samples(duration);
            iterations += 1;
        }
        self.next_grain_start = Some(cursor);
        pushed
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        config::EngineConfig,
        scheduler::tests::{constant_modulators, target},
    };

    #[test]
    fn grain_spacing() {
        // 100ms grains with density 2 at 44.1kHz: a grain every 50ms
        let config = EngineConfig::default().sample_rate(44100);
        let modulators = constant_modulators(1.0, 100.0, 2.0, 0.0);
        let mut scheduler = ContinuousScheduler::new();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut grains = Vec::new();

        let mut now = 0;
        while now < 44100 {
            let context = ScheduleContext::new(&config, now);
            scheduler.schedule(&context, &modulators, &target(), &mut rng, &mut grains);
            now += 512;
        }
        assert!(grains.len() > 10);
        for pair in grains.windows(2) {
            assert_eq!(pair[1].start_time - pair[0].start_time, 2205);
        }
        assert!(grains.iter().all(|grain| grain.sample_count == 4410));
    }

    #[test]
    fn grain_count_is_bounded() {
        let config = EngineConfig::default()
            .sample_rate(48000)
            .max_grains_per_tick(50);
        // 1ms grains with huge densities: offsets collapse to a single sample
        let modulators = constant_modulators(1.0, 1.0, 100.0, 0.0);
        let mut scheduler = ContinuousScheduler::new();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut grains = Vec::new();
        let context = ScheduleContext::new(&config, 0);
        let count = scheduler.schedule(&context, &modulators, &target(), &mut rng, &mut grains);
        assert_eq!(count, 50);
        assert_eq!(grains.len(), 50);
        // and also when called again in the same tick
        grains.clear();
        let count = scheduler.schedule(&context, &modulators, &target(), &mut rng, &mut grains);
        assert!(count <= 50);
    }

    #[test]
    fn silent_grains_keep_spacing() {
        let config = EngineConfig::default().sample_rate(1000);
        let mut scheduler = ContinuousScheduler::new();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut grains = Vec::new();

        let silent = constant_modulators(0.0, 10.0, 1.0, 0.0);
        let context = ScheduleContext::new(&config, 0);
        assert_eq!(
            scheduler.schedule(&context, &silent, &target(), &mut rng, &mut grains),
            0
        );
        // 22ms lookahead with 10ms grains: cursor advanced to 30
        assert_eq!(scheduler.next_grain_start(), Some(30));

        let audible = constant_modulators(1.0, 10.0, 1.0, 0.0);
        let context = ScheduleContext::new(&config, 10);
        scheduler.schedule(&context, &audible, &target(), &mut rng, &mut grains);
        assert_eq!(
            grains.iter().map(|g| g.start_time).collect::<Vec<_>>(),
            vec![30]
        );
    }

    #[test]
    fn stale_cursor_restarts_at_now() {
        let config = EngineConfig::default()
            .sample_rate(1000)
            .discard_grains_older_than_ms(10.0);
        let modulators = constant_modulators(1.0, 10.0, 1.0, 0.0);
        let mut scheduler = ContinuousScheduler::new();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut grains = Vec::new();

        scheduler.schedule(
            &ScheduleContext::new(&config, 0),
            &modulators,
            &target(),
            &mut rng,
            &mut grains,
        );
        grains.clear();
        // simulation stalled for a second
        scheduler.schedule(
            &ScheduleContext::new(&config, 1000),
            &modulators,
            &target(),
            &mut rng,
            &mut grains,
        );
        assert_eq!(grains.first().map(|g| g.start_time), Some(1000));
    }

    #[test]
    fn age_fade_scales_volume() {
        let config = EngineConfig::default().sample_rate(1000);
        let modulators = constant_modulators(0.5, 10.0, 1.0, 0.0);
        let mut scheduler = ContinuousScheduler::new();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut grains = Vec::new();
        let mut target = target();
        target.volume_scale = 0.5;
        scheduler.schedule(
            &ScheduleContext::new(&config, 0),
            &modulators,
            &target,
            &mut rng,
            &mut grains,
        );
        assert!(!grains.is_empty());
        assert!(grains.iter().all(|g| g.volume == 0.25));
    }
}
