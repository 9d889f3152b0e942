use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Reasons for dropping a scheduled grain before it got played.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumCount,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum GrainDiscardReason {
    /// The emitter's frame has no speaker attached.
    NoSpeaker,
    /// The grain's start time fell too far behind the audio clock.
    Stale,
    /// The target speaker has no free grain slot.
    PoolFull,
    /// The rendered grain did not fit into a grain slot.
    CopyFailure,
}

// -------------------------------------------------------------------------------------------------

/// Lock free engine counters, shared by the simulation threads and the audio mixer.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    scheduled: AtomicU64,
    rendered: AtomicU64,
    played: AtomicU64,
    discarded: [AtomicU64; GrainDiscardReason::COUNT],
    bursts: AtomicU64,
    dropped_collisions: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn add_scheduled(&self, count: u64) {
        self.scheduled.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_played(&self) {
        self.played.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_discarded(&self, reason: GrainDiscardReason) {
        self.discarded[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_burst(&self) {
        self.bursts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dropped_collision(&self) {
        self.dropped_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let discarded = |reason: GrainDiscardReason| {
            self.discarded[reason as usize].load(Ordering::Relaxed)
        };
        EngineStatsSnapshot {
            grains_scheduled: self.scheduled.load(Ordering::Relaxed),
            grains_rendered: self.rendered.load(Ordering::Relaxed),
            grains_played: self.played.load(Ordering::Relaxed),
            discarded_no_speaker: discarded(GrainDiscardReason::NoSpeaker),
            discarded_stale: discarded(GrainDiscardReason::Stale),
            discarded_pool_full: discarded(GrainDiscardReason::PoolFull),
            discarded_copy_failure: discarded(GrainDiscardReason::CopyFailure),
            bursts_triggered: self.bursts.load(Ordering::Relaxed),
            collisions_dropped: self.dropped_collisions.load(Ordering::Relaxed),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A copy of the engine's counters at some point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Grains above the audibility threshold the schedulers produced.
    pub grains_scheduled: u64,
    /// Grains which got rendered and handed over to a speaker.
    pub grains_rendered: u64,
    /// Grains the mixer started playing.
    pub grains_played: u64,
    pub discarded_no_speaker: u64,
    pub discarded_stale: u64,
    pub discarded_pool_full: u64,
    pub discarded_copy_failure: u64,
    pub bursts_triggered: u64,
    /// Collision events which got rejected because the collision queue was full.
    pub collisions_dropped: u64,
}

impl EngineStatsSnapshot {
    /// Total number of discarded grains.
    pub fn grains_discarded(&self) -> u64 {
        self.discarded_no_speaker
            + self.discarded_stale
            + self.discarded_pool_full
            + self.discarded_copy_failure
    }

    /// Number of discarded grains for the given reason.
    pub fn discarded(&self, reason: GrainDiscardReason) -> u64 {
        match reason {
            GrainDiscardReason::NoSpeaker => self.discarded_no_speaker,
            GrainDiscardReason::Stale => self.discarded_stale,
            GrainDiscardReason::PoolFull => self.discarded_pool_full,
            GrainDiscardReason::CopyFailure => self.discarded_copy_failure,
        }
    }
}

// -------------------------------------------------------------------------------------------------
