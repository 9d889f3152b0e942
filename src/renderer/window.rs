use std::sync::LazyLock;

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Grain envelope shapes.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum GrainWindowMode {
    /// Cosine-squared window. Sums to a constant with 50% overlap.
    #[default]
    Hann = 0,
    /// Raised cosine which does not fully reach zero at the edges.
    Hamming = 1,
    /// Tapered cosine with a flat top.
    Tukey = 2,
    /// Bell curve, truncated at the edges.
    Gaussian = 3,
    /// Half sine wave.
    Sine = 4,
}

impl GrainWindowMode {
    /// Precomputed lookup table for this window mode.
    pub fn lut(&self) -> &'static [f32] {
        GRAIN_WINDOWS.lut(*self)
    }
}

// -------------------------------------------------------------------------------------------------

/// Size of all precomputed grain window lookup tables.
pub const GRAIN_WINDOW_SIZE: usize = 2048;

static GRAIN_WINDOWS: LazyLock<GrainWindow<GRAIN_WINDOW_SIZE>> = LazyLock::new(GrainWindow::new);

// -------------------------------------------------------------------------------------------------

/// Precomputed, symmetric grain windows. `N` must be a pow2 value.
pub(crate) struct GrainWindow<const N: usize> {
    luts: [[f32; N]; GrainWindowMode::COUNT],
}

impl<const N: usize> GrainWindow<N> {
    const _VERIFY_N: () = assert!(
        N.is_power_of_two(),
        "Grain window size must be a pow2 value"
    );

    /// Tukey taper ratio.
    const TUKEY_ALPHA: f32 = 0.5;
    /// Gaussian width, relative to the window's half size.
    const GAUSSIAN_SIGMA: f32 = 0.4;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_N;

        use std::f32::consts::PI;
        let mut luts = [[0.0; N]; GrainWindowMode::COUNT];

        #[allow(clippy::needless_range_loop)]
        for i in 0..N {
            // [0.0, 1.0], symmetric around the center
            let phase = i as f32 / (N - 1) as f32;

            luts[GrainWindowMode::Hann as usize][i] = 0.5 * (1.0 - (2.0 * PI * phase).cos());

            luts[GrainWindowMode::Hamming as usize][i] = 0.54 - 0.46 * (2.0 * PI * phase).cos();

            let width = Self::TUKEY_ALPHA / 2.0;
            luts[GrainWindowMode::Tukey as usize][i] = if phase < width {
                0.5 * (1.0 - (PI * phase / width).cos())
            } else if phase > 1.0 - width {
                0.5 * (1.0 - (PI * (1.0 - phase) / width).cos())
            } else {
                1.0
            };

            let x = (phase - 0.5) / (Self::GAUSSIAN_SIGMA * 0.5);
            luts[GrainWindowMode::Gaussian as usize][i] = (-0.5 * x * x).exp();

            luts[GrainWindowMode::Sine as usize][i] = (PI * phase).sin().max(0.0);
        }

        Self { luts }
    }

    #[inline]
    pub fn lut(&self, mode: GrainWindowMode) -> &[f32] {
        &self.luts[mode as usize]
    }
}

// -------------------------------------------------------------------------------------------------
