//! Renders grain descriptors into windowed, pitch shifted PCM buffers.

use assume::assume;

use crate::scheduler::GrainDescriptor;

// -------------------------------------------------------------------------------------------------

pub(crate) mod window;

pub use window::{GrainWindowMode, GRAIN_WINDOW_SIZE};

// -------------------------------------------------------------------------------------------------

/// Reusable audio and DSP scratch buffers for rendering a single grain.
///
/// Both buffers always have the same length: the grain's length plus its DSP tail.
#[derive(Debug, Clone, Default)]
pub struct GrainBuffer {
    audio: Vec<f32>,
    scratch: Vec<f32>,
}

impl GrainBuffer {
    /// Create a new buffer which can hold grains of up to `max_len` sample frames without
    /// reallocating.
    pub fn with_capacity(max_len: usize) -> Self {
        Self {
            audio: Vec::with_capacity(max_len),
            scratch: Vec::with_capacity(max_len),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.audio.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    #[inline]
    pub fn audio(&self) -> &[f32] {
        &self.audio
    }

    #[inline]
    pub fn scratch(&self) -> &[f32] {
        &self.scratch
    }

    /// Mutable access to the audio and scratch buffer at the same time.
    #[inline]
    pub fn split_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.audio, &mut self.scratch)
    }

    /// Clear and resize both buffers to the given length, filled with zeros.
    fn prepare(&mut self, len: usize) {
        self.audio.clear();
        self.audio.resize(len, 0.0);
        self.scratch.clear();
        self.scratch.resize(len, 0.0);
    }
}

// -------------------------------------------------------------------------------------------------

/// Render a grain from the given mono source clip into `buffer`.
///
/// Reads start at the grain's normalized playhead and advance by the grain's pitch per output
/// sample, linearly interpolating between source samples. When a forward read would run past the
/// end of the source, the grain either reflects at the clip boundaries (when the descriptor asks
/// for it) or gets truncated with silence. Every sample is scaled by the grain's volume and the
/// given window lookup table, stretched over the grain's length.
///
/// The buffer is resized to the grain's total length: the DSP tail is zero filled.
pub fn render_grain(
    descriptor: &GrainDescriptor,
    source: &[f32],
    window: &[f32],
    buffer: &mut GrainBuffer,
) {
    let sample_count = descriptor.sample_count;
    buffer.prepare(descriptor.total_len());
    if source.is_empty() || sample_count == 0 {
        return;
    }

    let last_index = (source.len() - 1) as f64;
    let start = (descriptor.playhead as f64 * source.len() as f64).clamp(0.0, last_index);
    let pitch = descriptor.pitch as f64;
    let naive_end = start + pitch * (sample_count - 1) as f64;
    let reflect = descriptor.reflect_at_boundary && naive_end > last_index;

    let volume = descriptor.volume;
    let output = &mut buffer.audio[..sample_count];
    for (index, sample) in output.iter_mut().enumerate() {
        let position = start + pitch * index as f64;
        let value = if reflect {
            interpolate(source, reflected_position(position, source.len()))
        } else if position > last_index {
            // truncated: the rest of the grain stays silent
            break;
        } else {
            interpolate(source, position)
        };
        let gain = if window.is_empty() {
            1.0
        } else {
            let window_index = index * window.len() / sample_count;
            assume!(unsafe: window_index < window.len(), "index < sample_count");
            window[window_index]
        };
        *sample = value * volume * gain;
    }
}

/// Fold a forward read position back and forth between the first and last sample of a clip with
/// the given length. The result always lies within `0..=len-1`.
#[inline]
pub fn reflected_position(position: f64, len: usize) -> f64 {
    if len <= 1 {
        return 0.0;
    }
    let last_index = (len - 1) as f64;
    let period = 2.0 * last_index;
    let folded = position.rem_euclid(period);
    let folded = if folded > last_index {
        period - folded
    } else {
        folded
    };
    folded.clamp(0.0, last_index)
}

/// Linear interpolated read. Integral positions read the source sample as is.
#[inline]
fn interpolate(source: &[f32], position: f64) -> f32 {
    let index = position as usize;
    let fraction = (position - index as f64) as f32;
    if fraction == 0.0 || index + 1 >= source.len() {
        source[index.min(source.len() - 1)]
    } else {
        assume!(unsafe: index + 1 < source.len());
        source[index] * (1.0 - fraction) + source[index + 1] * fraction
    }
}

// -------------------------------------------------------------------------------------------------
