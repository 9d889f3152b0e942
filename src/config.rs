use glam::Vec3;

use crate::{utils::time::ms_to_samples, Error};

// -------------------------------------------------------------------------------------------------

/// Global engine settings.
///
/// Use the chainable setters to override the defaults, e.g.
/// `EngineConfig::default().sample_rate(48000).speakers_allocated(16)`.
/// The configuration gets validated when creating an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Audio output sample rate in Hz. Source clips must use the same rate.
    pub sample_rate: u32,
    /// Number of interleaved output channels the mixer writes.
    pub channel_count: usize,
    /// How far ahead of the audio clock grains get scheduled, in milliseconds.
    pub queue_duration_ms: f32,
    /// Grains which start more than this amount of milliseconds behind the audio clock get
    /// dropped instead of played.
    pub discard_grains_older_than_ms: f32,
    /// Size of the fixed speaker (voice) pool.
    pub speakers_allocated: usize,
    /// Number of concurrently playing grain slots per speaker.
    pub grains_per_speaker: usize,
    /// Seconds a speaker lingers without hosts before it returns to the pool.
    pub speaker_linger_time: f32,
    /// Grain load (0..1) above which a speaker accepts no new hosts.
    pub speaker_busy_load_limit: f32,
    /// Angular size of a speaker's capture area, as seen from the listener.
    pub speaker_attach_arc_degrees: f32,
    /// Lower bound for a speaker's capture radius close to the listener.
    pub speaker_min_radius: f32,
    /// Time constant in seconds for moving speakers towards their host centroid.
    pub speaker_position_smoothing: f32,
    /// Upper bound of grains a continuous emitter may schedule in a single tick.
    pub max_grains_per_tick: usize,
    /// Upper bound of grains a single burst may schedule.
    pub max_grains_per_burst: usize,
    /// Grains with a resolved volume at or below this value are not scheduled.
    pub audibility_threshold: f32,
    /// Seconds after a burst trigger in which further collisions are ignored.
    pub burst_debounce_duration: f32,
    /// Max random start delay for bursts in milliseconds.
    pub burst_start_offset_range_ms: f32,
    /// Capacity of the collision event queue.
    pub collision_queue_capacity: usize,
    /// Number of worker threads for the emitter stage. 0 or 1 processes inline.
    pub worker_thread_count: usize,
    /// Try promoting emitter worker threads to real-time priority.
    pub realtime_workers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            channel_count: Self::DEFAULT_CHANNEL_COUNT,
            queue_duration_ms: 22.0,
            discard_grains_older_than_ms: 10.0,
            speakers_allocated: 32,
            grains_per_speaker: 100,
            speaker_linger_time: 0.5,
            speaker_busy_load_limit: 0.6,
            speaker_attach_arc_degrees: 10.0,
            speaker_min_radius: 0.25,
            speaker_position_smoothing: 0.05,
            max_grains_per_tick: 50,
            max_grains_per_burst: 256,
            audibility_threshold: 0.005,
            burst_debounce_duration: 0.1,
            burst_start_offset_range_ms: 2.0,
            collision_queue_capacity: 1024,
            worker_thread_count: num_cpus::get().clamp(1, 8),
            realtime_workers: true,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
    pub const DEFAULT_CHANNEL_COUNT: usize = 2;

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn queue_duration_ms(mut self, ms: f32) -> Self {
        self.queue_duration_ms = ms;
        self
    }

    pub fn discard_grains_older_than_ms(mut self, ms: f32) -> Self {
        self.discard_grains_older_than_ms = ms;
        self
    }

    pub fn speakers_allocated(mut self, count: usize) -> Self {
        self.speakers_allocated = count;
        self
    }

    pub fn grains_per_speaker(mut self, count: usize) -> Self {
        self.grains_per_speaker = count;
        self
    }

    pub fn speaker_linger_time(mut self, seconds: f32) -> Self {
        self.speaker_linger_time = seconds;
        self
    }

    pub fn speaker_busy_load_limit(mut self, limit: f32) -> Self {
        self.speaker_busy_load_limit = limit;
        self
    }

    pub fn speaker_attach_arc_degrees(mut self, degrees: f32) -> Self {
        self.speaker_attach_arc_degrees = degrees;
        self
    }

    pub fn speaker_min_radius(mut self, radius: f32) -> Self {
        self.speaker_min_radius = radius;
        self
    }

    pub fn speaker_position_smoothing(mut self, seconds: f32) -> Self {
        self.speaker_position_smoothing = seconds;
        self
    }

    pub fn max_grains_per_tick(mut self, count: usize) -> Self {
        self.max_grains_per_tick = count;
        self
    }

    pub fn max_grains_per_burst(mut self, count: usize) -> Self {
        self.max_grains_per_burst = count;
        self
    }

    pub fn collision_queue_capacity(mut self, capacity: usize) -> Self {
        self.collision_queue_capacity = capacity;
        self
    }

    pub fn audibility_threshold(mut self, threshold: f32) -> Self {
        self.audibility_threshold = threshold;
        self
    }

    pub fn burst_debounce_duration(mut self, seconds: f32) -> Self {
        self.burst_debounce_duration = seconds;
        self
    }

    pub fn burst_start_offset_range_ms(mut self, ms: f32) -> Self {
        self.burst_start_offset_range_ms = ms;
        self
    }

    pub fn worker_thread_count(mut self, count: usize) -> Self {
        self.worker_thread_count = count;
        self
    }

    pub fn realtime_workers(mut self, enabled: bool) -> Self {
        self.realtime_workers = enabled;
        self
    }

    /// Scheduling lookahead in sample frames.
    pub fn queue_lookahead_samples(&self) -> u64 {
        ms_to_samples(self.queue_duration_ms, self.sample_rate).round() as u64
    }

    /// Staleness bound in sample frames.
    pub fn discard_threshold_samples(&self) -> u64 {
        ms_to_samples(self.discard_grains_older_than_ms, self.sample_rate).round() as u64
    }

    /// Longest grain buffer (including DSP tails) a speaker slot can hold: one second.
    pub fn max_grain_samples(&self) -> usize {
        self.sample_rate as usize
    }

    /// Validate all settings.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ConfigurationError(
                "Sample rate must be > 0".to_string(),
            ));
        }
        if self.channel_count == 0 {
            return Err(Error::ConfigurationError(
                "Channel count must be > 0".to_string(),
            ));
        }
        if !(self.queue_duration_ms >= 0.0) {
            return Err(Error::ConfigurationError(format!(
                "Queue duration must be >= 0 ms, but is {}",
                self.queue_duration_ms
            )));
        }
        if !(self.discard_grains_older_than_ms >= 0.0) {
            return Err(Error::ConfigurationError(format!(
                "Grain discard threshold must be >= 0 ms, but is {}",
                self.discard_grains_older_than_ms
            )));
        }
        if self.speakers_allocated == 0 {
            return Err(Error::ConfigurationError(
                "At least one speaker must be allocated".to_string(),
            ));
        }
        if self.grains_per_speaker == 0 {
            return Err(Error::ConfigurationError(
                "Speakers need at least one grain slot".to_string(),
            ));
        }
        if !(self.speaker_linger_time >= 0.0) {
            return Err(Error::ConfigurationError(format!(
                "Speaker linger time must be >= 0, but is {}",
                self.speaker_linger_time
            )));
        }
        if !(0.0..=1.0).contains(&self.speaker_busy_load_limit) {
            return Err(Error::ConfigurationError(format!(
                "Speaker busy load limit must be between 0 and 1, but is {}",
                self.speaker_busy_load_limit
            )));
        }
        if !(self.speaker_attach_arc_degrees > 0.0 && self.speaker_attach_arc_degrees <= 360.0) {
            return Err(Error::ConfigurationError(format!(
                "Speaker attach arc must be between 0 and 360 degrees, but is {}",
                self.speaker_attach_arc_degrees
            )));
        }
        if !(self.speaker_min_radius >= 0.0) || !(self.speaker_position_smoothing >= 0.0) {
            return Err(Error::ConfigurationError(
                "Speaker min radius and position smoothing must be >= 0".to_string(),
            ));
        }
        if self.max_grains_per_tick == 0 || self.max_grains_per_burst == 0 {
            return Err(Error::ConfigurationError(
                "Grain count limits must be > 0".to_string(),
            ));
        }
        if !(self.audibility_threshold >= 0.0) {
            return Err(Error::ConfigurationError(format!(
                "Audibility threshold must be >= 0, but is {}",
                self.audibility_threshold
            )));
        }
        if !(self.burst_debounce_duration >= 0.0) || !(self.burst_start_offset_range_ms >= 0.0) {
            return Err(Error::ConfigurationError(
                "Burst debounce and start offset range must be >= 0".to_string(),
            ));
        }
        if self.collision_queue_capacity == 0 {
            return Err(Error::ConfigurationError(
                "Collision queue capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// The listener's world position and the radius in which emitters are audible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    pub radius: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            radius: 30.0,
        }
    }
}

impl Listener {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self { position, radius }
    }

    /// Test if the given world position is within the listener's radius.
    #[inline]
    pub fn contains(&self, position: Vec3) -> bool {
        self.position.distance(position) <= self.radius
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs() {
        assert!(EngineConfig::default().sample_rate(0).validate().is_err());
        assert!(EngineConfig::default()
            .speakers_allocated(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .speaker_busy_load_limit(1.5)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .queue_duration_ms(f32::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn sample_conversions() {
        let config = EngineConfig::default()
            .sample_rate(48000)
            .queue_duration_ms(20.0)
            .discard_grains_older_than_ms(10.0);
        assert_eq!(config.queue_lookahead_samples(), 960);
        assert_eq!(config.discard_threshold_samples(), 480);
        assert_eq!(config.max_grain_samples(), 48000);
    }

    #[test]
    fn listener_radius() {
        let listener = Listener::new(Vec3::new(1.0, 0.0, 0.0), 2.0);
        assert!(listener.contains(Vec3::new(3.0, 0.0, 0.0)));
        assert!(!listener.contains(Vec3::new(3.1, 0.0, 0.0)));
    }
}
