//! Per-parameter modulation of emitter control values by interaction inputs.
//!
//! A [`ModulationParameter`] describes how a single emitter parameter (volume, playhead,
//! duration, density, transpose or burst length) follows one [`InteractionInput`]: the raw input
//! gets mapped into 0..1, smoothed, shaped and added to the parameter's base value. Noise can be
//! layered on top of it, either as a perlin noise walk or as uniform random values.

use rand::Rng;

use crate::{
    utils::{clamp01, lerp},
    Error,
};

// -------------------------------------------------------------------------------------------------

mod input;
mod noise;

pub use input::{InputGroup, InteractionInput, InteractionValues};

use noise::PerlinLane;

// -------------------------------------------------------------------------------------------------

/// How modulated values get bounded into the parameter's range.
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
)]
#[repr(u8)]
pub enum LimiterMode {
    /// Clamp values to the range.
    #[default]
    Clip,
    /// Wrap values around the range boundaries.
    Wrap,
    /// Fold values back and forth between the range boundaries.
    PingPong,
}

// -------------------------------------------------------------------------------------------------

/// Static configuration of a single modulated emitter parameter.
///
/// Use the chainable setters to configure it:
/// `ModulationParameter::new(0.0, 1.0, 0.2).input(InteractionInput::Speed, 0.0, 10.0)
/// .influence(0.8)`
#[derive(Debug, Clone, PartialEq)]
pub struct ModulationParameter {
    /// Lower bound of the parameter value.
    pub min: f32,
    /// Upper bound of the parameter value.
    pub max: f32,
    /// Base value. For bursts the value at the start of the burst.
    pub start_value: f32,
    /// Value at the end of a burst. Unused by continuous emitters.
    pub end_value: f32,
    /// Interaction input which modulates the parameter.
    pub input: InteractionInput,
    /// Raw input value that maps to no modulation.
    pub input_min: f32,
    /// Raw input value that maps to full modulation.
    pub input_max: f32,
    /// When set, the normalized input is integrated over time instead of applied directly.
    pub accumulate: bool,
    /// Input smoothing amount in range 0..=1: 0 follows the input instantly, 1 freezes it.
    pub smoothing: f32,
    /// Amount and direction of the input's influence on the value, relative to the range.
    pub influence: f32,
    /// Shapes the input (continuous) or the burst time (bursts).
    pub exponent: f32,
    /// Amount of noise in range 0..=1, relative to half of the range.
    pub noise_amount: f32,
    /// Speed of the perlin noise walk in noise cells per second.
    pub noise_speed: f32,
    /// Use perlin noise instead of uniform random values.
    pub use_perlin: bool,
    /// Hold the noise value constant for the duration of a burst.
    pub lock_noise: bool,
    /// Pin the value to `start_value` at the beginning of a burst.
    pub fixed_start: bool,
    /// Pin the value to `end_value` at the end of a burst.
    pub fixed_end: bool,
    /// How out-of-range values get limited.
    pub limiter: LimiterMode,
}

impl Default for ModulationParameter {
    fn default() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }
}

impl ModulationParameter {
    /// Create a new unmodulated parameter with the given range and constant value.
    pub fn new(min: f32, max: f32, value: f32) -> Self {
        Self {
            min,
            max,
            start_value: value,
            end_value: value,
            input: InteractionInput::Blank,
            input_min: 0.0,
            input_max: 1.0,
            accumulate: false,
            smoothing: 0.0,
            influence: 0.0,
            exponent: 1.0,
            noise_amount: 0.0,
            noise_speed: 1.0,
            use_perlin: false,
            lock_noise: false,
            fixed_start: false,
            fixed_end: false,
            limiter: LimiterMode::Clip,
        }
    }

    /// Set burst start and end values.
    pub fn start_end(mut self, start_value: f32, end_value: f32) -> Self {
        self.start_value = start_value;
        self.end_value = end_value;
        self
    }

    /// Set the modulating input and the raw input range which maps to 0..1.
    pub fn input(mut self, input: InteractionInput, input_min: f32, input_max: f32) -> Self {
        self.input = input;
        self.input_min = input_min;
        self.input_max = input_max;
        self
    }

    pub fn accumulate(mut self, accumulate: bool) -> Self {
        self.accumulate = accumulate;
        self
    }

    pub fn smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn influence(mut self, influence: f32) -> Self {
        self.influence = influence;
        self
    }

    pub fn exponent(mut self, exponent: f32) -> Self {
        self.exponent = exponent;
        self
    }

    /// Add uniform random noise.
    pub fn noise(mut self, amount: f32) -> Self {
        self.noise_amount = amount;
        self.use_perlin = false;
        self
    }

    /// Add perlin noise, moving with the given speed.
    pub fn perlin_noise(mut self, amount: f32, speed: f32) -> Self {
        self.noise_amount = amount;
        self.noise_speed = speed;
        self.use_perlin = true;
        self
    }

    pub fn lock_noise(mut self, lock: bool) -> Self {
        self.lock_noise = lock;
        self
    }

    pub fn fixed(mut self, fixed_start: bool, fixed_end: bool) -> Self {
        self.fixed_start = fixed_start;
        self.fixed_end = fixed_end;
        self
    }

    pub fn limiter(mut self, limiter: LimiterMode) -> Self {
        self.limiter = limiter;
        self
    }

    /// Validate the parameter's configuration.
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        let all_finite = [
            self.min,
            self.max,
            self.start_value,
            self.end_value,
            self.input_min,
            self.input_max,
            self.influence,
            self.exponent,
            self.noise_speed,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' contains non finite values"
            )));
        }
        if self.min > self.max {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' range is inverted: min {} > max {}",
                self.min, self.max
            )));
        }
        if self.exponent <= 0.0 {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' exponent must be > 0, but is {}",
                self.exponent
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' smoothing must be in range 0..=1, but is {}",
                self.smoothing
            )));
        }
        if !(0.0..=1.0).contains(&self.noise_amount) {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' noise amount must be in range 0..=1, but is {}",
                self.noise_amount
            )));
        }
        if self.noise_speed < 0.0 {
            return Err(Error::ParameterError(format!(
                "Parameter '{name}' noise speed must be >= 0, but is {}",
                self.noise_speed
            )));
        }
        Ok(())
    }

    /// Map a raw input value into range 0..=1.
    #[inline]
    pub fn normalize_input(&self, raw: f32) -> f32 {
        let input_range = self.input_max - self.input_min;
        if input_range == 0.0 || !input_range.is_finite() {
            return 0.0;
        }
        clamp01((raw - self.input_min) / input_range)
    }
}

// -------------------------------------------------------------------------------------------------

/// Runtime state of a [`ModulationParameter`].
///
/// Updated once per tick from the emitter's interaction input via [`Self::update`], then read
/// while scheduling grains via [`Self::value`] or [`Self::time_shaped_value`].
#[derive(Debug, Clone)]
pub(crate) struct Modulator {
    parameter: ModulationParameter,
    smoothed_input: Option<f32>,
    accumulated_input: f32,
    perlin: PerlinLane,
    locked_noise: Option<f32>,
}

impl Modulator {
    /// Time constant in seconds of an input smoothing amount of 0.5.
    const SMOOTHING_TIME_SCALE: f32 = 0.25;
    /// Decay rate per second of accumulated input values.
    const ACCUMULATOR_DECAY: f32 = 1.0;

    pub fn new(parameter: ModulationParameter, noise_lane: f64) -> Self {
        Self {
            parameter,
            smoothed_input: None,
            accumulated_input: 0.0,
            perlin: PerlinLane::new(noise_lane),
            locked_noise: None,
        }
    }

    #[inline]
    pub fn parameter(&self) -> &ModulationParameter {
        &self.parameter
    }

    /// Smoothed, normalized input value in range 0..=1.
    #[inline]
    pub fn input(&self) -> f32 {
        self.smoothed_input.unwrap_or(0.0)
    }

    /// Feed a new raw input value and advance smoothing and noise by `delta_time` seconds.
    pub fn update(&mut self, raw_input: f32, delta_time: f32) {
        let delta_time = if delta_time.is_finite() {
            delta_time.max(0.0)
        } else {
            0.0
        };
        let normalized = self.parameter.normalize_input(raw_input);
        let target = if self.parameter.accumulate {
            let decay = (-Self::ACCUMULATOR_DECAY * delta_time).exp();
            self.accumulated_input = clamp01(self.accumulated_input * decay + normalized * delta_time);
            self.accumulated_input
        } else {
            normalized
        };
        self.smoothed_input = Some(match self.smoothed_input {
            None => target,
            Some(current) => {
                let smoothing = clamp01(self.parameter.smoothing);
                if smoothing <= 0.0 {
                    target
                } else if smoothing >= 1.0 {
                    current
                } else {
                    let tau = Self::SMOOTHING_TIME_SCALE * smoothing / (1.0 - smoothing);
                    let alpha = 1.0 - (-delta_time / tau).exp();
                    current + (target - current) * alpha
                }
            }
        });
        self.perlin
            .advance(self.parameter.noise_speed as f64 * delta_time as f64);
    }

    /// Update and resolve the current value in one go.
    pub fn resolve<R: Rng>(&mut self, raw_input: f32, delta_time: f32, rng: &mut R) -> f32 {
        self.update(raw_input, delta_time);
        self.value(rng)
    }

    /// Resolve the current value of a continuous parameter.
    pub fn value<R: Rng>(&self, rng: &mut R) -> f32 {
        let shaped = if self.parameter.limiter == LimiterMode::Clip {
            self.input().powf(self.parameter.exponent)
        } else {
            self.input()
        };
        self.compose(self.parameter.start_value, shaped, 1.0, rng)
    }

    /// Resolve the value of a burst parameter at the given normalized burst progress.
    ///
    /// The base value moves from start to end value along the progress shaped by the exponent.
    /// Fixed starts or ends fade out modulation and noise towards the burst's boundaries.
    pub fn time_shaped_value<R: Rng>(&self, progress: f32, rng: &mut R) -> f32 {
        let time = clamp01(progress).powf(self.parameter.exponent);
        let mut gate = 1.0;
        if self.parameter.fixed_start {
            gate *= time;
        }
        if self.parameter.fixed_end {
            gate *= 1.0 - time;
        }
        let base = lerp(self.parameter.start_value, self.parameter.end_value, time);
        self.compose(base, self.input(), gate, rng)
    }

    /// Draw and hold a noise value until [`Self::unlock_noise`] is called. Only applies when
    /// the parameter is configured to lock its noise.
    pub fn lock_noise<R: Rng>(&mut self, rng: &mut R) {
        if self.parameter.lock_noise {
            // draw a fresh value instead of the previously locked one
            self.unlock_noise();
            self.locked_noise = Some(self.noise(rng));
        }
    }

    pub fn unlock_noise(&mut self) {
        self.locked_noise = None;
    }

    /// Current noise value in range -1..=1.
    fn noise<R: Rng>(&self, rng: &mut R) -> f32 {
        if let Some(locked) = self.locked_noise {
            locked
        } else if self.parameter.noise_amount <= 0.0 {
            0.0
        } else if self.parameter.use_perlin {
            self.perlin.sample()
        } else {
            rng.random_range(-1.0..=1.0)
        }
    }

    fn compose<R: Rng>(&self, base: f32, modulation: f32, gate: f32, rng: &mut R) -> f32 {
        let parameter = &self.parameter;
        let span = parameter.max - parameter.min;
        if !(span > f32::EPSILON) {
            return parameter.min;
        }
        let noise = self.noise(rng) * parameter.noise_amount * 0.5 * gate;
        let modulation = modulation * parameter.influence * gate;
        match parameter.limiter {
            LimiterMode::Clip => {
                let value = base + (modulation + noise) * span;
                if value.is_nan() {
                    parameter.min
                } else {
                    value.clamp(parameter.min, parameter.max)
                }
            }
            LimiterMode::Wrap | LimiterMode::PingPong => {
                let position = (base - parameter.min) / span + modulation + noise;
                if !position.is_finite() {
                    return parameter.min;
                }
                let position = if parameter.limiter == LimiterMode::Wrap {
                    position.rem_euclid(1.0)
                } else {
                    let folded = position.rem_euclid(2.0);
                    if folded > 1.0 {
                        2.0 - folded
                    } else {
                        folded
                    }
                };
                (parameter.min + position * span).clamp(parameter.min, parameter.max)
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    const INPUTS: [f32; 10] = [
        -1.0e9,
        -1.0,
        0.0,
        0.25,
        0.5,
        1.0,
        1.0e9,
        f32::NAN,
        f32::INFINITY,
        f32::NEG_INFINITY,
    ];

    #[test]
    fn input_mapping() {
        let param = ModulationParameter::new(0.0, 1.0, 0.0).input(InteractionInput::Speed, 2.0, 4.0);
        assert_eq!(param.normalize_input(3.0), 0.5);
        assert_eq!(param.normalize_input(-10.0), 0.0);
        assert_eq!(param.normalize_input(10.0), 1.0);
        assert_eq!(param.normalize_input(f32::NAN), 0.0);
        let degenerate = param.clone().input(InteractionInput::Speed, 2.0, 2.0);
        assert_eq!(degenerate.normalize_input(3.0), 0.0);
        // inverted input ranges invert the mapping
        let inverted = param.input(InteractionInput::Speed, 4.0, 2.0);
        assert_eq!(inverted.normalize_input(4.0), 0.0);
        assert_eq!(inverted.normalize_input(2.0), 1.0);
    }

    #[test]
    fn clip_stays_in_range() {
        let mut rng = SmallRng::seed_from_u64(1);
        for noise_amount in [0.0, 0.3, 1.0] {
            for use_perlin in [false, true] {
                for influence in [-4.0, -1.0, 0.0, 1.0, 4.0] {
                    let mut param = ModulationParameter::new(-2.0, 3.0, 2.5)
                        .input(InteractionInput::Speed, 0.0, 1.0)
                        .influence(influence)
                        .exponent(2.0);
                    param.noise_amount = noise_amount;
                    param.use_perlin = use_perlin;
                    let mut modulator = Modulator::new(param, 3.0);
                    for input in INPUTS {
                        for _ in 0..8 {
                            let value = modulator.resolve(input, 0.016, &mut rng);
                            assert!(
                                (-2.0..=3.0).contains(&value),
                                "{value} out of range for input {input}"
                            );
                            let shaped = modulator.time_shaped_value(0.5, &mut rng);
                            assert!((-2.0..=3.0).contains(&shaped));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn wrap_and_ping_pong_stay_in_range() {
        let mut rng = SmallRng::seed_from_u64(2);
        for limiter in [LimiterMode::Wrap, LimiterMode::PingPong] {
            for noise_amount in [0.0, 0.5, 1.0] {
                let param = ModulationParameter::new(10.0, 20.0, 19.0)
                    .input(InteractionInput::Mass, -1.0, 1.0)
                    .influence(3.3)
                    .noise(noise_amount)
                    .limiter(limiter);
                let mut modulator = Modulator::new(param, 5.0);
                for input in INPUTS {
                    let value = modulator.resolve(input, 0.02, &mut rng);
                    assert!((10.0..=20.0).contains(&value), "{limiter}: {value}");
                    for progress in [0.0, 0.3, 1.0] {
                        let value = modulator.time_shaped_value(progress, &mut rng);
                        assert!((10.0..=20.0).contains(&value), "{limiter}: {value}");
                    }
                }
            }
        }
    }

    #[test]
    fn wrap_modes() {
        let mut rng = SmallRng::seed_from_u64(3);
        let param = ModulationParameter::new(0.0, 1.0, 0.75)
            .input(InteractionInput::Speed, 0.0, 1.0)
            .influence(0.5);
        let mut wrap = Modulator::new(param.clone().limiter(LimiterMode::Wrap), 0.0);
        let mut ping_pong = Modulator::new(param.limiter(LimiterMode::PingPong), 0.0);
        assert!((wrap.resolve(1.0, 0.0, &mut rng) - 0.25).abs() < 1e-5);
        assert!((ping_pong.resolve(1.0, 0.0, &mut rng) - 0.75).abs() < 1e-5);
    }

    #[test]
    fn degenerate_range() {
        let mut rng = SmallRng::seed_from_u64(4);
        let param = ModulationParameter::new(5.0, 5.0, 5.0)
            .input(InteractionInput::Speed, 0.0, 1.0)
            .influence(1.0)
            .noise(1.0);
        let mut modulator = Modulator::new(param, 0.0);
        assert_eq!(modulator.resolve(0.7, 0.1, &mut rng), 5.0);
    }

    #[test]
    fn smoothing() {
        let mut rng = SmallRng::seed_from_u64(5);
        let param = ModulationParameter::new(0.0, 1.0, 0.0)
            .input(InteractionInput::Speed, 0.0, 1.0)
            .influence(1.0);

        // instant
        let mut modulator = Modulator::new(param.clone().smoothing(0.0), 0.0);
        modulator.update(0.0, 0.1);
        assert_eq!(modulator.resolve(1.0, 0.1, &mut rng), 1.0);

        // frozen
        let mut modulator = Modulator::new(param.clone().smoothing(1.0), 0.0);
        modulator.update(0.2, 0.1);
        modulator.update(1.0, 10.0);
        assert!((modulator.input() - 0.2).abs() < 1e-6);

        // converging
        let mut modulator = Modulator::new(param.smoothing(0.5), 0.0);
        modulator.update(0.0, 0.1);
        let mut last = 0.0;
        for _ in 0..20 {
            modulator.update(1.0, 0.05);
            assert!(modulator.input() > last && modulator.input() < 1.0);
            last = modulator.input();
        }
        for _ in 0..200 {
            modulator.update(1.0, 0.05);
        }
        assert!((modulator.input() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn accumulate() {
        let param = ModulationParameter::new(0.0, 1.0, 0.0)
            .input(InteractionInput::CollisionForce, 0.0, 1.0)
            .accumulate(true);
        let mut modulator = Modulator::new(param, 0.0);
        modulator.update(1.0, 0.1);
        let first = modulator.input();
        modulator.update(1.0, 0.1);
        assert!(modulator.input() > first);
        for _ in 0..100 {
            modulator.update(0.0, 0.1);
        }
        assert!(modulator.input() < first);
    }

    #[test]
    fn time_shaped_values() {
        let mut rng = SmallRng::seed_from_u64(6);
        let param = ModulationParameter::new(0.0, 100.0, 0.0).start_end(10.0, 90.0);
        let modulator = Modulator::new(param.clone(), 0.0);
        assert_eq!(modulator.time_shaped_value(0.0, &mut rng), 10.0);
        assert_eq!(modulator.time_shaped_value(0.5, &mut rng), 50.0);
        assert_eq!(modulator.time_shaped_value(1.0, &mut rng), 90.0);

        let modulator = Modulator::new(param.clone().exponent(2.0), 0.0);
        assert_eq!(modulator.time_shaped_value(0.5, &mut rng), 30.0);

        // fixed ends pin values while modulating through the middle
        let mut modulator = Modulator::new(
            param
                .input(InteractionInput::Speed, 0.0, 1.0)
                .influence(0.1)
                .noise(0.5)
                .fixed(true, true),
            0.0,
        );
        modulator.update(1.0, 0.0);
        assert_eq!(modulator.time_shaped_value(0.0, &mut rng), 10.0);
        assert_eq!(modulator.time_shaped_value(1.0, &mut rng), 90.0);
        assert!(modulator.time_shaped_value(0.5, &mut rng) != 50.0);
    }

    #[test]
    fn locked_noise() {
        let mut rng = SmallRng::seed_from_u64(7);
        let param = ModulationParameter::new(0.0, 1.0, 0.5)
            .noise(1.0)
            .lock_noise(true);
        let mut modulator = Modulator::new(param, 0.0);
        modulator.lock_noise(&mut rng);
        let value = modulator.time_shaped_value(0.0, &mut rng);
        for progress in [0.1, 0.5, 0.9] {
            assert_eq!(modulator.time_shaped_value(progress, &mut rng), value);
        }
        modulator.unlock_noise();
        let values = (0..8)
            .map(|_| modulator.value(&mut rng))
            .collect::<Vec<_>>();
        assert!(values.iter().any(|v| *v != value));
    }

    #[test]
    fn relocking_draws_new_noise() {
        let mut rng = SmallRng::seed_from_u64(3);
        let param = ModulationParameter::new(0.0, 1.0, 0.5)
            .noise(1.0)
            .lock_noise(true);
        let mut modulator = Modulator::new(param, 0.0);
        modulator.lock_noise(&mut rng);
        let first = modulator.locked_noise;
        modulator.lock_noise(&mut rng);
        let second = modulator.locked_noise;
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn validation() {
        assert!(ModulationParameter::new(0.0, 1.0, 0.5).validate("test").is_ok());
        assert!(ModulationParameter::new(1.0, 0.0, 0.5).validate("test").is_err());
        assert!(ModulationParameter::new(0.0, 1.0, f32::NAN)
            .validate("test")
            .is_err());
        assert!(ModulationParameter::new(0.0, 1.0, 0.5)
            .exponent(0.0)
            .validate("test")
            .is_err());
        assert!(ModulationParameter::new(0.0, 1.0, 0.5)
            .noise(1.5)
            .validate("test")
            .is_err());
    }
}
