//! Emitter configuration and the emitter runtime, which schedules, renders and hands off grains.

use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    dsp::{DspChain, DspContext, DspEffect},
    modulation::{InteractionInput, InteractionValues, LimiterMode, ModulationParameter, Modulator},
    renderer::{render_grain, GrainBuffer, GrainWindowMode},
    scheduler::{
        BurstScheduler, ContinuousScheduler, GrainDescriptor, GrainModulators, GrainTarget,
        ScheduleContext,
    },
    stats::{EngineStats, GrainDiscardReason},
    utils::{clamp01, permit_alloc, time::AudioClock},
    voice::SpeakerGrainPool,
    ClipId, EmitterId, EngineConfig, Error, FrameId, SpeakerId,
};

// -------------------------------------------------------------------------------------------------

/// Scheduling behavior of an emitter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum EmitterType {
    /// Streams grains for as long as the emitter exists.
    #[default]
    Continuous,
    /// Plays a fixed length burst of grains per qualifying collision.
    Burst,
}

// -------------------------------------------------------------------------------------------------

/// Volume envelope over the emitter's normalized age (the [`InteractionInput::NormalizedAge`]
/// input): fades in from age 0 to `fade_in` and out from `fade_out_start` to age 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeFade {
    pub fade_in: f32,
    pub fade_out_start: f32,
}

impl Default for AgeFade {
    fn default() -> Self {
        Self {
            fade_in: 0.0,
            fade_out_start: 0.8,
        }
    }
}

impl AgeFade {
    pub fn new(fade_in: f32, fade_out_start: f32) -> Self {
        Self {
            fade_in,
            fade_out_start,
        }
    }

    /// Volume multiplier at the given normalized age.
    pub fn gain(&self, normalized_age: f32) -> f32 {
        let age = clamp01(normalized_age);
        let fade_in = if self.fade_in > 0.0 && age < self.fade_in {
            age / self.fade_in
        } else {
            1.0
        };
        let fade_out = if self.fade_out_start < 1.0 && age > self.fade_out_start {
            (1.0 - age) / (1.0 - self.fade_out_start)
        } else {
            1.0
        };
        fade_in.min(fade_out)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0 <= self.fade_in && self.fade_in <= self.fade_out_start && self.fade_out_start <= 1.0)
        {
            return Err(Error::ParameterError(format!(
                "Age fade thresholds must satisfy 0 <= fade in ({}) <= fade out start ({}) <= 1",
                self.fade_in, self.fade_out_start
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Modulation parameters of an emitter's grains.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterParameters {
    /// Linear grain volume.
    pub volume: ModulationParameter,
    /// Normalized read position in the source clip.
    pub playhead: ModulationParameter,
    /// Grain duration in milliseconds.
    pub duration: ModulationParameter,
    /// Grain overlap: grains start every `duration / density` milliseconds.
    pub density: ModulationParameter,
    /// Pitch shift in octaves.
    pub transpose: ModulationParameter,
    /// Burst length in milliseconds. Burst emitters only.
    pub length: Option<ModulationParameter>,
}

impl Default for EmitterParameters {
    fn default() -> Self {
        Self::continuous()
    }
}

impl EmitterParameters {
    /// Default parameters for continuous emitters.
    pub fn continuous() -> Self {
        Self {
            volume: ModulationParameter::new(0.0, 1.0, 1.0),
            playhead: ModulationParameter::new(0.0, 1.0, 0.0),
            duration: ModulationParameter::new(5.0, 1000.0, 100.0),
            density: ModulationParameter::new(0.1, 32.0, 2.0),
            transpose: ModulationParameter::new(-4.0, 4.0, 0.0),
            length: None,
        }
    }

    /// Default parameters for burst emitters.
    pub fn burst() -> Self {
        Self {
            duration: ModulationParameter::new(5.0, 1000.0, 50.0),
            length: Some(ModulationParameter::new(10.0, 5000.0, 300.0)),
            ..Self::continuous()
        }
    }

    pub fn volume(mut self, parameter: ModulationParameter) -> Self {
        self.volume = parameter;
        self
    }

    pub fn playhead(mut self, parameter: ModulationParameter) -> Self {
        self.playhead = parameter;
        self
    }

    pub fn duration(mut self, parameter: ModulationParameter) -> Self {
        self.duration = parameter;
        self
    }

    pub fn density(mut self, parameter: ModulationParameter) -> Self {
        self.density = parameter;
        self
    }

    pub fn transpose(mut self, parameter: ModulationParameter) -> Self {
        self.transpose = parameter;
        self
    }

    pub fn length(mut self, parameter: ModulationParameter) -> Self {
        self.length = Some(parameter);
        self
    }

    pub fn validate(&self, emitter_type: EmitterType) -> Result<(), Error> {
        self.volume.validate("volume")?;
        self.playhead.validate("playhead")?;
        self.duration.validate("duration")?;
        self.density.validate("density")?;
        self.transpose.validate("transpose")?;
        match (emitter_type, &self.length) {
            (EmitterType::Continuous, Some(_)) => Err(Error::ConfigurationError(
                "The length parameter only applies to burst emitters".to_string(),
            )),
            (EmitterType::Burst, None) => Err(Error::ConfigurationError(
                "Burst emitters need a length parameter".to_string(),
            )),
            (EmitterType::Burst, Some(length)) => {
                length.validate("length")?;
                if length.limiter != LimiterMode::Clip {
                    return Err(Error::ConfigurationError(
                        "The burst length parameter only supports the clip limiter".to_string(),
                    ));
                }
                Ok(())
            }
            (EmitterType::Continuous, None) => Ok(()),
        }
    }

    fn modulators(&self, noise_lane: f64) -> GrainModulators {
        let modulator = |parameter: &ModulationParameter, index: usize| {
            Modulator::new(parameter.clone(), noise_lane + index as f64)
        };
        GrainModulators {
            volume: modulator(&self.volume, 0),
            playhead: modulator(&self.playhead, 1),
            duration: modulator(&self.duration, 2),
            density: modulator(&self.density, 3),
            transpose: modulator(&self.transpose, 4),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Static configuration of an emitter, supplied by the host application.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterConfig {
    pub emitter_type: EmitterType,
    /// The frame the emitter is anchored at.
    pub frame: FrameId,
    /// Source clip of all grains.
    pub clip: ClipId,
    pub parameters: EmitterParameters,
    /// Per grain effects, applied in order.
    pub dsp_chain: Vec<DspEffect>,
    pub window: GrainWindowMode,
    /// Fold reads back into the clip instead of truncating grains at the clip's end.
    pub reflect_at_boundary: bool,
    pub age_fade: Option<AgeFade>,
    /// Minimum collision force which triggers a burst.
    pub burst_trigger_threshold: f32,
    /// Seed for the emitter's random numbers. Random when `None`.
    pub seed: Option<u64>,
}

impl EmitterConfig {
    /// A continuous emitter with default parameters.
    pub fn continuous(frame: FrameId, clip: ClipId) -> Self {
        Self {
            emitter_type: EmitterType::Continuous,
            frame,
            clip,
            parameters: EmitterParameters::continuous(),
            dsp_chain: Vec::new(),
            window: GrainWindowMode::default(),
            reflect_at_boundary: false,
            age_fade: None,
            burst_trigger_threshold: 0.0,
            seed: None,
        }
    }

    /// A burst emitter with default parameters.
    pub fn burst(frame: FrameId, clip: ClipId) -> Self {
        Self {
            emitter_type: EmitterType::Burst,
            parameters: EmitterParameters::burst(),
            burst_trigger_threshold: 0.1,
            ..Self::continuous(frame, clip)
        }
    }

    pub fn parameters(mut self, parameters: EmitterParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn dsp_chain(mut self, effects: Vec<DspEffect>) -> Self {
        self.dsp_chain = effects;
        self
    }

    pub fn window(mut self, window: GrainWindowMode) -> Self {
        self.window = window;
        self
    }

    pub fn reflect_at_boundary(mut self, reflect: bool) -> Self {
        self.reflect_at_boundary = reflect;
        self
    }

    pub fn age_fade(mut self, age_fade: AgeFade) -> Self {
        self.age_fade = Some(age_fade);
        self
    }

    pub fn burst_trigger_threshold(mut self, threshold: f32) -> Self {
        self.burst_trigger_threshold = threshold;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate all parameters which don't depend on the engine. DSP effects get validated
    /// when the emitter gets added to an engine, as they depend on the sample rate.
    pub fn validate(&self) -> Result<(), Error> {
        self.parameters.validate(self.emitter_type)?;
        if let Some(age_fade) = &self.age_fade {
            age_fade.validate()?;
        }
        if !(self.burst_trigger_threshold >= 0.0) {
            return Err(Error::ConfigurationError(format!(
                "Burst trigger threshold must be >= 0, but is {}",
                self.burst_trigger_threshold
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Per worker rendering state: the grain scratch buffer and the handles needed to hand grains
/// over to the speakers.
pub(crate) struct EmitterRenderer {
    pool: SpeakerGrainPool,
    clock: AudioClock,
    stats: Arc<EngineStats>,
    buffer: GrainBuffer,
}

impl EmitterRenderer {
    pub fn new(
        pool: SpeakerGrainPool,
        clock: AudioClock,
        stats: Arc<EngineStats>,
        max_grain_samples: usize,
    ) -> Self {
        Self {
            pool,
            clock,
            stats,
            buffer: GrainBuffer::with_capacity(max_grain_samples),
        }
    }

    /// Render a grain, run the DSP chain on it and copy it into a free slot of its speaker.
    fn render(
        &mut self,
        grain: &GrainDescriptor,
        clip: &[f32],
        window: GrainWindowMode,
        dsp_chain: &DspChain,
        seed: u64,
        context: &ScheduleContext,
    ) {
        let Some(speaker) = grain.speaker.and_then(|id| self.pool.get(id)) else {
            self.stats.add_discarded(GrainDiscardReason::NoSpeaker);
            return;
        };
        // skip rendering grains which would be rejected anyway
        if grain.start_time + context.discard_threshold_samples < self.clock.now() {
            self.stats.add_discarded(GrainDiscardReason::Stale);
            return;
        }
        render_grain(grain, clip, window.lut(), &mut self.buffer);
        if !dsp_chain.is_empty() {
            let dsp_context = DspContext {
                sample_rate: context.sample_rate,
                grain_len: grain.sample_count,
                start_time: grain.start_time,
                seed,
            };
            dsp_chain.process(&dsp_context, &mut self.buffer);
        }
        self.stats.add_rendered();
        if let Err(reason) = speaker.assign(
            self.buffer.audio(),
            grain.start_time,
            self.clock.now(),
            context.discard_threshold_samples,
        ) {
            self.stats.add_discarded(reason);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Kind specific scheduling state of an emitter.
#[derive(Debug, Clone)]
pub(crate) enum EmitterKind {
    Continuous(ContinuousScheduler),
    Burst {
        scheduler: BurstScheduler,
        length: Modulator,
        /// Strongest collision force since the last tick.
        pending_force: Option<f32>,
    },
}

// -------------------------------------------------------------------------------------------------

/// Runtime state of an emitter.
pub(crate) struct Emitter {
    id: EmitterId,
    frame: FrameId,
    clip_id: ClipId,
    clip: Arc<[f32]>,
    kind: EmitterKind,
    modulators: GrainModulators,
    dsp_chain: DspChain,
    window: GrainWindowMode,
    reflect_at_boundary: bool,
    age_fade: Option<AgeFade>,
    inputs: InteractionValues,
    speaker: Option<SpeakerId>,
    seed: u64,
    rng: SmallRng,
    grains: Vec<GrainDescriptor>,
}

impl Emitter {
    /// Create a new emitter from a validated config.
    pub fn new(
        id: EmitterId,
        config: &EmitterConfig,
        clip: Arc<[f32]>,
        engine_config: &EngineConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let dsp_chain = DspChain::new(config.dsp_chain.clone(), engine_config.sample_rate)?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        // each emitter walks its own set of perlin lanes
        let noise_lane = (seed % 4096) as f64 * 8.0;
        let kind = match (&config.emitter_type, &config.parameters.length) {
            (EmitterType::Burst, Some(length)) => EmitterKind::Burst {
                scheduler: BurstScheduler::new(config.burst_trigger_threshold),
                length: Modulator::new(length.clone(), noise_lane + 5.0),
                pending_force: None,
            },
            _ => EmitterKind::Continuous(ContinuousScheduler::new()),
        };
        let max_grains = engine_config
            .max_grains_per_tick
            .max(engine_config.max_grains_per_burst);
        Ok(Self {
            id,
            frame: config.frame,
            clip_id: config.clip,
            clip,
            kind,
            modulators: config.parameters.modulators(noise_lane),
            dsp_chain,
            window: config.window,
            reflect_at_boundary: config.reflect_at_boundary,
            age_fade: config.age_fade,
            inputs: InteractionValues::new(),
            speaker: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            grains: Vec::with_capacity(max_grains),
        })
    }

    #[inline]
    pub fn id(&self) -> EmitterId {
        self.id
    }

    #[inline]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    #[inline]
    pub fn is_burst(&self) -> bool {
        matches!(self.kind, EmitterKind::Burst { .. })
    }

    pub fn set_speaker(&mut self, speaker: Option<SpeakerId>) {
        self.speaker = speaker;
    }

    pub fn set_input(&mut self, input: InteractionInput, value: f32) {
        self.inputs.set(input, value);
    }

    /// Apply a collision. Burst emitters trigger with the strongest force of a tick.
    pub fn push_collision(&mut self, force: f32, speed: f32) {
        self.inputs.set(InteractionInput::CollisionForce, force);
        self.inputs.set(InteractionInput::CollisionSpeed, speed);
        if let EmitterKind::Burst { pending_force, .. } = &mut self.kind {
            if force.is_finite() {
                *pending_force = Some(pending_force.map_or(force, |pending| pending.max(force)));
            }
        }
    }

    /// Estimated processing cost for the next tick.
    pub fn weight(&self) -> usize {
        let grain_cost = 1 + self.dsp_chain.weight();
        match &self.kind {
            EmitterKind::Continuous(_) => 2 * grain_cost,
            EmitterKind::Burst {
                pending_force: Some(_),
                ..
            } => 8 * grain_cost,
            EmitterKind::Burst { .. } => 1,
        }
    }

    /// Run a tick: update modulators, schedule due grains and render them into their speaker.
    pub fn process(
        &mut self,
        context: &ScheduleContext,
        delta_time: f32,
        renderer: &mut EmitterRenderer,
    ) {
        self.modulators.update(&self.inputs, delta_time);

        let volume_scale = self.age_fade.map_or(1.0, |fade| {
            fade.gain(self.inputs.get(InteractionInput::NormalizedAge))
        });
        let target = GrainTarget {
            clip: self.clip_id,
            speaker: self.speaker,
            reflect_at_boundary: self.reflect_at_boundary,
            dsp_tail: self.dsp_chain.tail_samples(),
            volume_scale,
        };

        self.grains.clear();
        match &mut self.kind {
            EmitterKind::Continuous(scheduler) => {
                scheduler.schedule(
                    context,
                    &self.modulators,
                    &target,
                    &mut self.rng,
                    &mut self.grains,
                );
            }
            EmitterKind::Burst {
                scheduler,
                length,
                pending_force,
            } => {
                let raw_length = self.inputs.get(length.parameter().input);
                length.update(raw_length, delta_time);
                if let Some(force) = pending_force.take() {
                    if let Some(burst) = scheduler.trigger(
                        force,
                        context,
                        &mut self.modulators,
                        length,
                        &target,
                        &mut self.rng,
                        &mut self.grains,
                    ) {
                        renderer.stats.add_burst();
                        permit_alloc(|| {
                            log::debug!(
                                "Emitter #{} triggered a burst of {} grains over {} frames",
                                self.id,
                                burst.grain_count,
                                burst.length
                            )
                        });
                    }
                }
            }
        }

        if self.grains.is_empty() {
            return;
        }
        renderer.stats.add_scheduled(self.grains.len() as u64);
        for grain in &self.grains {
            renderer.render(
                grain,
                &self.clip,
                self.window,
                &self.dsp_chain,
                self.seed,
                context,
            );
        }
    }
}

// -------------------------------------------------------------------------------------------------
