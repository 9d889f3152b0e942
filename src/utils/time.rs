use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

// -------------------------------------------------------------------------------------------------

/// Absolute time in sample frames, as counted by the audio clock.
pub type SampleTime = u64;

// -------------------------------------------------------------------------------------------------

/// Convert a duration in milliseconds to sample frames with the given sample rate.
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> f32 {
    debug_assert!(sample_rate > 0, "Invalid sample rate");
    ms * sample_rate as f32 / 1000.0
}

// -------------------------------------------------------------------------------------------------

/// Shared audio clock: the number of sample frames the mixer has written so far.
///
/// The mixer is the only writer. The simulation thread reads it to know where "now" is when
/// scheduling grains ahead of the audio thread.
#[derive(Debug, Clone, Default)]
pub struct AudioClock {
    position: Arc<AtomicU64>,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sample frame position.
    #[inline]
    pub fn now(&self) -> SampleTime {
        self.position.load(Ordering::Acquire)
    }

    /// Advance the clock by the given amount of sample frames.
    #[inline]
    pub(crate) fn advance(&self, frames: u64) {
        self.position.fetch_add(frames, Ordering::Release);
    }
}

// -------------------------------------------------------------------------------------------------
