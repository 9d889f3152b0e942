//! Per speaker grain slot pools, shared between the emitter stage and the audio mixer.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::{
    stats::GrainDiscardReason,
    utils::{permit_alloc, time::SampleTime, AtomicF32},
};

// -------------------------------------------------------------------------------------------------

/// A preallocated buffer holding one rendered grain, which waits for or is in playback.
#[derive(Debug)]
pub(crate) struct GrainSlot {
    samples: Vec<f32>,
    playhead: usize,
    start_time: SampleTime,
}

impl GrainSlot {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            playhead: 0,
            start_time: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn start_time(&self) -> SampleTime {
        self.start_time
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.playhead > 0
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.playhead >= self.samples.len()
    }

    /// Copy a rendered grain into the slot. Fails when the grain exceeds the slot's capacity.
    fn fill(&mut self, grain: &[f32], start_time: SampleTime) -> bool {
        if grain.len() > self.samples.capacity() {
            return false;
        }
        self.samples.clear();
        self.samples.extend_from_slice(grain);
        self.playhead = 0;
        self.start_time = start_time;
        true
    }

    /// Add the next samples of the grain to `output` (interleaved with `channel_count`),
    /// starting at the given frame offset. Returns the number of written frames.
    pub fn mix_into(
        &mut self,
        output: &mut [f32],
        channel_count: usize,
        frame_offset: usize,
        gains: (f32, f32),
    ) -> usize {
        let remaining = &self.samples[self.playhead.min(self.samples.len())..];
        let frames = output.chunks_exact_mut(channel_count).skip(frame_offset);
        let mut written = 0;
        for (frame, sample) in frames.zip(remaining) {
            if channel_count == 1 {
                frame[0] += sample * (gains.0 + gains.1) * std::f32::consts::FRAC_1_SQRT_2;
            } else {
                frame[0] += sample * gains.0;
                frame[1] += sample * gains.1;
            }
            written += 1;
        }
        self.playhead += written;
        written
    }
}

// -------------------------------------------------------------------------------------------------

/// Lock free queues of a single speaker.
///
/// Slots circulate between the `free` queue (owned by producers) and the `ready` queue (owned
/// by the mixer). Every slot is in exactly one of both queues or in the mixer's playing list,
/// so neither side ever allocates.
#[derive(Debug)]
pub(crate) struct SpeakerQueues {
    free: ArrayQueue<Box<GrainSlot>>,
    ready: ArrayQueue<Box<GrainSlot>>,
    slot_count: usize,
    left_gain: AtomicF32,
    right_gain: AtomicF32,
}

impl SpeakerQueues {
    pub fn new(slot_count: usize, max_grain_samples: usize) -> Self {
        let free = ArrayQueue::new(slot_count);
        for _ in 0..slot_count {
            let pushed = free.push(Box::new(GrainSlot::new(max_grain_samples)));
            debug_assert!(pushed.is_ok(), "free list is sized to hold all slots");
        }
        Self {
            free,
            ready: ArrayQueue::new(slot_count),
            slot_count,
            left_gain: AtomicF32::new(0.0),
            right_gain: AtomicF32::new(0.0),
        }
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Ratio of slots which are not free, 0..=1.
    #[inline]
    pub fn grain_load(&self) -> f32 {
        (self.slot_count - self.free.len().min(self.slot_count)) as f32 / self.slot_count as f32
    }

    #[inline]
    pub fn gains(&self) -> (f32, f32) {
        (self.left_gain.load(), self.right_gain.load())
    }

    #[inline]
    pub fn set_gains(&self, left: f32, right: f32) {
        self.left_gain.store(left);
        self.right_gain.store(right);
    }

    /// Copy a rendered grain into a free slot and queue it for playback.
    pub fn assign(
        &self,
        grain: &[f32],
        start_time: SampleTime,
        now: SampleTime,
        discard_threshold: u64,
    ) -> Result<(), GrainDiscardReason> {
        if start_time + discard_threshold < now {
            return Err(GrainDiscardReason::Stale);
        }
        let mut slot = self.free.pop().ok_or(GrainDiscardReason::PoolFull)?;
        if !slot.fill(grain, start_time) {
            self.recycle(slot);
            return Err(GrainDiscardReason::CopyFailure);
        }
        self.ready.push(slot).map_err(|slot| {
            self.recycle(slot);
            GrainDiscardReason::PoolFull
        })
    }

    /// Pop the next grain which got queued for playback.
    #[inline]
    pub fn pop_ready(&self) -> Option<Box<GrainSlot>> {
        self.ready.pop()
    }

    /// Return a played or dropped slot to the free list.
    #[inline]
    pub fn recycle(&self, slot: Box<GrainSlot>) {
        if self.free.push(slot).is_err() {
            permit_alloc(|| log::error!("Grain slot free list overflow"));
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Producer side view on all speaker queues.
#[derive(Debug, Clone)]
pub(crate) struct SpeakerGrainPool {
    speakers: Arc<[Arc<SpeakerQueues>]>,
}

impl SpeakerGrainPool {
    pub fn new(speaker_count: usize, slot_count: usize, max_grain_samples: usize) -> Self {
        let speakers = (0..speaker_count)
            .map(|_| Arc::new(SpeakerQueues::new(slot_count, max_grain_samples)))
            .collect();
        Self { speakers }
    }

    pub fn speakers(&self) -> &[Arc<SpeakerQueues>] {
        &self.speakers
    }

    pub fn get(&self, speaker: usize) -> Option<&SpeakerQueues> {
        self.speakers.get(speaker).map(Arc::as_ref)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_circulation() {
        let queues = SpeakerQueues::new(2, 8);
        assert_eq!(queues.grain_load(), 0.0);
        assert_eq!(queues.assign(&[1.0; 4], 100, 0, 0), Ok(()));
        assert_eq!(queues.grain_load(), 0.5);
        assert_eq!(queues.assign(&[1.0; 4], 100, 0, 0), Ok(()));
        assert_eq!(queues.grain_load(), 1.0);
        assert_eq!(
            queues.assign(&[1.0; 4], 100, 0, 0),
            Err(GrainDiscardReason::PoolFull)
        );
        let slot = queues.pop_ready().unwrap();
        assert_eq!(slot.len(), 4);
        assert_eq!(slot.start_time(), 100);
        queues.recycle(slot);
        assert_eq!(queues.grain_load(), 0.5);
    }

    #[test]
    fn free_list_starts_full_and_rejects_extra_slots() {
        let queues = SpeakerQueues::new(3, 8);
        assert_eq!(queues.grain_load(), 0.0);
        // a slot which never belonged to this speaker doesn't fit anymore
        queues.recycle(Box::new(GrainSlot::new(8)));
        assert_eq!(queues.grain_load(), 0.0);
        for _ in 0..3 {
            assert_eq!(queues.assign(&[1.0; 4], 0, 0, 0), Ok(()));
        }
        assert_eq!(queues.grain_load(), 1.0);
    }

    #[test]
    fn stale_and_oversized_grains() {
        let queues = SpeakerQueues::new(2, 8);
        // starts 20 frames behind the clock with a threshold of 10
        assert_eq!(
            queues.assign(&[1.0; 4], 80, 100, 10),
            Err(GrainDiscardReason::Stale)
        );
        assert_eq!(queues.assign(&[1.0; 4], 90, 100, 10), Ok(()));
        assert_eq!(
            queues.assign(&[1.0; 16], 100, 100, 10),
            Err(GrainDiscardReason::CopyFailure)
        );
        // the slot went back to the free list
        assert_eq!(queues.grain_load(), 0.5);
    }

    #[test]
    fn mixing() {
        let queues = SpeakerQueues::new(1, 8);
        queues.assign(&[1.0, 2.0, 3.0], 0, 0, 0).unwrap();
        let mut slot = queues.pop_ready().unwrap();
        let mut output = vec![0.0; 8];
        // stereo, 4 frames, starting at frame 2
        assert_eq!(slot.mix_into(&mut output, 2, 2, (0.5, 1.0)), 2);
        assert_eq!(output, vec![0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 2.0]);
        assert!(slot.is_started() && !slot.is_exhausted());
        output.fill(0.0);
        assert_eq!(slot.mix_into(&mut output, 2, 0, (1.0, 1.0)), 1);
        assert_eq!(output[..2], [3.0, 3.0]);
        assert!(slot.is_exhausted());
    }
}
