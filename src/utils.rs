//! Common, shared helpers used by the engine, mixer and demos.

pub mod time;

use std::sync::atomic::{AtomicU32, Ordering};

// -------------------------------------------------------------------------------------------------

/// Equal power panning factors for the left and right channel of a panning value in
/// range -1.0 (full left) to 1.0 (full right).
pub fn panning_factors(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

// -------------------------------------------------------------------------------------------------

/// Clamp a value into range 0..=1. NaNs are mapped to 0.
#[inline]
pub fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// -------------------------------------------------------------------------------------------------

/// A f32 value which can be shared across threads without locking.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------------------------------------

/// Run `func` in a realtime context, where allocations get reported when the "assert-allocs"
/// feature is enabled.
#[inline]
pub(crate) fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::assert_no_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}

/// Temporarily allow allocations within an [`assert_no_alloc`] context.
#[inline]
pub(crate) fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::permit_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}

// -------------------------------------------------------------------------------------------------
