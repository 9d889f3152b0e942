use std::sync::Arc;

use crate::{
    stats::{EngineStats, GrainDiscardReason},
    utils::{assert_no_alloc, time::AudioClock},
    voice::{GrainSlot, SpeakerGrainPool, SpeakerQueues},
};

// -------------------------------------------------------------------------------------------------

/// Playing grains of a single speaker.
struct SpeakerVoice {
    queues: Arc<SpeakerQueues>,
    playing: Vec<Box<GrainSlot>>,
}

impl SpeakerVoice {
    fn new(queues: Arc<SpeakerQueues>) -> Self {
        let playing = Vec::with_capacity(queues.slot_count());
        Self { queues, playing }
    }
}

// -------------------------------------------------------------------------------------------------

/// Realtime audio side of the [`Engine`](crate::Engine): mixes all grains of all speakers into
/// an interleaved output buffer and drives the engine's audio clock.
///
/// Move it into an output device or call [`process`](Self::process) from your own audio
/// callback. Processing never allocates, locks or blocks.
pub struct SpeakerMixer {
    voices: Vec<SpeakerVoice>,
    clock: AudioClock,
    stats: Arc<EngineStats>,
    sample_rate: u32,
    channel_count: usize,
    discard_threshold: u64,
}

impl SpeakerMixer {
    pub(crate) fn new(
        pool: &SpeakerGrainPool,
        clock: AudioClock,
        stats: Arc<EngineStats>,
        sample_rate: u32,
        channel_count: usize,
        discard_threshold: u64,
    ) -> Self {
        let voices = pool
            .speakers()
            .iter()
            .map(|queues| SpeakerVoice::new(Arc::clone(queues)))
            .collect();
        Self {
            voices,
            clock,
            stats,
            sample_rate,
            channel_count,
            discard_threshold,
        }
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved output channels.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// The clock this mixer advances.
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    /// Number of grains which are currently playing or waiting for their start time.
    pub fn playing_grain_count(&self) -> usize {
        self.voices.iter().map(|voice| voice.playing.len()).sum()
    }

    /// Render the next block of interleaved audio. Only whole frames get rendered: trailing
    /// samples of an incomplete frame are zeroed.
    pub fn process(&mut self, output: &mut [f32]) {
        assert_no_alloc(|| self.process_block(output))
    }

    fn process_block(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let channel_count = self.channel_count;
        let frame_count = output.len() / channel_count;
        let now = self.clock.now();
        let block_end = now + frame_count as u64;

        for voice in &mut self.voices {
            while voice.playing.len() < voice.playing.capacity() {
                match voice.queues.pop_ready() {
                    Some(slot) => voice.playing.push(slot),
                    None => break,
                }
            }
            let gains = voice.queues.gains();

            let mut index = 0;
            while index < voice.playing.len() {
                let slot = &mut voice.playing[index];
                if !slot.is_started() && slot.start_time() + self.discard_threshold < now {
                    self.stats.add_discarded(GrainDiscardReason::Stale);
                    voice.queues.recycle(voice.playing.swap_remove(index));
                    continue;
                }
                if slot.start_time() >= block_end {
                    index += 1;
                    continue;
                }
                let frame_offset = slot.start_time().saturating_sub(now) as usize;
                slot.mix_into(output, channel_count, frame_offset, gains);
                if slot.is_exhausted() {
                    self.stats.add_played();
                    voice.queues.recycle(voice.playing.swap_remove(index));
                } else {
                    index += 1;
                }
            }
        }

        self.clock.advance(frame_count as u64);
    }

    /// Return all playing and pending grains of this mixer to their speaker's free list.
    /// Does not allocate, so it can be called from the audio thread.
    pub(crate) fn release_grains(&mut self) {
        for voice in &mut self.voices {
            for slot in voice.playing.drain(..) {
                voice.queues.recycle(slot);
            }
        }
    }
}

impl Drop for SpeakerMixer {
    fn drop(&mut self) {
        self.release_grains();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(channel_count: usize, discard_threshold: u64) -> (SpeakerMixer, SpeakerGrainPool) {
        let pool = SpeakerGrainPool::new(2, 4, 64);
        let mixer = SpeakerMixer::new(
            &pool,
            AudioClock::new(),
            EngineStats::new(),
            1000,
            channel_count,
            discard_threshold,
        );
        (mixer, pool)
    }

    #[test]
    fn grains_start_sample_accurate() {
        let (mut mixer, pool) = mixer(2, 0);
        let speaker = pool.get(0).unwrap();
        speaker.set_gains(1.0, 0.5);
        speaker.assign(&[1.0; 6], 3, 0, 0).unwrap();

        let mut output = vec![0.0; 8];
        mixer.process(&mut output);
        assert_eq!(output, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.5]);
        assert_eq!(mixer.clock().now(), 4);
        assert_eq!(speaker.grain_load(), 0.25);

        mixer.process(&mut output);
        assert_eq!(output, vec![1.0, 0.5, 1.0, 0.5, 1.0, 0.5, 1.0, 0.5]);
        mixer.process(&mut output);
        assert_eq!(output, vec![1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(speaker.grain_load(), 0.0);
        assert_eq!(mixer.stats.snapshot().grains_played, 1);
        assert_eq!(mixer.playing_grain_count(), 0);
    }

    #[test]
    fn speakers_and_grains_sum_up() {
        let (mut mixer, pool) = mixer(1, 0);
        for speaker in pool.speakers() {
            speaker.set_gains(1.0, 0.0);
            speaker.assign(&[1.0; 4], 0, 0, 0).unwrap();
            speaker.assign(&[2.0; 2], 1, 0, 0).unwrap();
        }
        let mut output = vec![0.0; 4];
        mixer.process(&mut output);
        let gain = std::f32::consts::FRAC_1_SQRT_2;
        let expected = [2.0 * gain, 6.0 * gain, 6.0 * gain, 2.0 * gain];
        for (sample, expected) in output.iter().zip(expected) {
            assert!((sample - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn late_grains_get_dropped() {
        let (mut mixer, pool) = mixer(2, 2);
        let speaker = pool.get(1).unwrap();
        let mut output = vec![0.0; 20];
        mixer.process(&mut output);
        // 10 frames in, a grain which should have started at frame 5 is too late
        speaker.assign(&[1.0; 4], 5, 0, 2).unwrap();
        mixer.process(&mut output);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.stats.snapshot().discarded_stale, 1);
        assert_eq!(speaker.grain_load(), 0.0);
    }

    #[test]
    fn released_grains_return_to_the_pool() {
        let (mut mixer, pool) = mixer(2, 100);
        let speaker = pool.get(0).unwrap();
        speaker.assign(&[1.0; 4], 2, 0, 100).unwrap();
        speaker.assign(&[1.0; 4], 50, 0, 100).unwrap();
        let mut output = vec![0.0; 8];
        mixer.process(&mut output);
        assert_eq!(mixer.playing_grain_count(), 2);
        assert_eq!(speaker.grain_load(), 0.5);

        mixer.release_grains();
        assert_eq!(mixer.playing_grain_count(), 0);
        assert_eq!(speaker.grain_load(), 0.0);

        speaker.assign(&[1.0; 4], 60, 0, 100).unwrap();
        mixer.process(&mut output);
        assert_eq!(speaker.grain_load(), 0.25);
        drop(mixer);
        assert_eq!(speaker.grain_load(), 0.0);
    }
}
