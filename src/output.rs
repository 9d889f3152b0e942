#[cfg(feature = "cpal-output")]
pub mod cpal;
#[cfg(feature = "wav-output")]
pub mod wav;

// -------------------------------------------------------------------------------------------------

/// Common properties of audio outputs which play back a [`SpeakerMixer`](crate::SpeakerMixer).
pub trait OutputDevice {
    /// Actual output's interleaved channel count.
    fn channel_count(&self) -> usize;
    /// Actual output's sample rate.
    fn sample_rate(&self) -> u32;
    /// Actual output's playhead position in sample frames.
    fn sample_position(&self) -> u64;
}
