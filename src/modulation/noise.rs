use std::sync::LazyLock;

use noise::{NoiseFn, Perlin};

// -------------------------------------------------------------------------------------------------

const PERLIN_SEED: u32 = 0x6772_6e62;

/// Shared perlin noise generator. Parameters walk their own lane through it.
static PERLIN: LazyLock<Perlin> = LazyLock::new(|| Perlin::new(PERLIN_SEED));

// -------------------------------------------------------------------------------------------------

/// A single parameter's walk through the shared 2D perlin noise field.
///
/// The lane selects the row, the phase advances along it with the parameter's noise speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PerlinLane {
    lane: f64,
    phase: f64,
}

impl PerlinLane {
    /// Lane offsets are kept off integer grid points, where perlin noise is always 0.
    pub fn new(lane: f64) -> Self {
        Self {
            lane: lane.floor() + 0.5,
            phase: 0.0,
        }
    }

    pub fn advance(&mut self, amount: f64) {
        // keep phase small enough to not lose precision
        self.phase = (self.phase + amount).rem_euclid(65536.0);
    }

    /// Current noise value in range -1..=1.
    pub fn sample(&self) -> f32 {
        (PERLIN.get([self.phase, self.lane]) as f32).clamp(-1.0, 1.0)
    }
}

// -------------------------------------------------------------------------------------------------
