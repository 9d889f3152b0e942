//! Continuous emitters on frames which orbit around the listener. Grain density and pitch
//! follow the frames' speed, the playhead drifts with perlin noise.

use std::time::Duration;

use grainbrain::{
    dsp::{BiquadFilterType, FilterEffect, FlangeEffect},
    EmitterConfig, EmitterId, EmitterParameters, EngineConfig, Error, FrameId, GrainWindowMode,
    InteractionInput, Listener, ModulationParameter, Vec3,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

// Common demo code
#[path = "./common/arguments.rs"]
mod arguments;

// -------------------------------------------------------------------------------------------------

/// A frame moving on a circle around the listener.
struct Orbit {
    frame: FrameId,
    emitter: EmitterId,
    radius: f32,
    /// Angular speed in radians per second.
    speed: f32,
    height: f32,
}

impl Orbit {
    fn position(&self, time: f32) -> Vec3 {
        let angle = time * self.speed;
        Vec3::new(
            angle.cos() * self.radius,
            self.height,
            angle.sin() * self.radius,
        )
    }

    fn velocity(&self) -> f32 {
        self.speed.abs() * self.radius
    }
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    // Parse optional arguments
    let args = arguments::parse();

    let config = EngineConfig::default().speakers_allocated(8);
    let sample_rate = config.sample_rate;

    arguments::run(
        &args,
        config,
        Duration::from_secs(12),
        |engine| {
            engine.set_listener(Listener::new(Vec3::ZERO, 25.0));
            let low = engine.add_clip(arguments::tone_clip(sample_rate, 3.0, 110.0))?;
            let high = engine.add_clip(arguments::tone_clip(sample_rate, 2.0, 440.0))?;

            let parameters = EmitterParameters::continuous()
                .volume(ModulationParameter::new(0.0, 1.0, 0.4))
                .playhead(
                    ModulationParameter::new(0.0, 1.0, 0.3)
                        .perlin_noise(0.3, 0.2)
                        .limiter(grainbrain::LimiterMode::PingPong),
                )
                .duration(ModulationParameter::new(5.0, 1000.0, 80.0).noise(0.2))
                .density(
                    ModulationParameter::new(0.1, 32.0, 2.0)
                        .start_end(1.5, 6.0)
                        .input(InteractionInput::Speed, 0.0, 20.0)
                        .smoothing(0.5),
                )
                .transpose(
                    ModulationParameter::new(-4.0, 4.0, 0.0)
                        .start_end(-1.0, 1.0)
                        .input(InteractionInput::Speed, 0.0, 20.0),
                );

            let mut orbits = Vec::new();
            for (index, (radius, speed, height)) in [
                (3.0, 0.8, 0.0),
                (6.0, -0.5, 1.0),
                (10.0, 0.3, -1.0),
                (15.0, -0.2, 2.0),
                (20.0, 0.15, 0.0),
                (24.0, 0.1, 0.0),
            ]
            .into_iter()
            .enumerate()
            {
                let mut orbit = Orbit {
                    frame: 0,
                    emitter: 0,
                    radius,
                    speed,
                    height,
                };
                orbit.frame = engine.add_frame(orbit.position(0.0));
                let clip = if index % 2 == 0 { low } else { high };
                let mut emitter = EmitterConfig::continuous(orbit.frame, clip)
                    .seed(index as u64)
                    .parameters(parameters.clone())
                    .window(GrainWindowMode::Tukey);
                if index % 3 == 1 {
                    emitter = emitter.dsp_chain(vec![
                        FilterEffect::new(BiquadFilterType::LowPass, 1200.0, 0.9).into(),
                        FlangeEffect::default().into(),
                    ]);
                }
                orbit.emitter = engine.add_emitter(emitter)?;
                orbits.push(orbit);
            }
            Ok(orbits)
        },
        |engine, orbits, position| {
            let time = position as f32 / sample_rate as f32;
            for orbit in orbits.iter() {
                // ids are valid as long as the demo doesn't remove anything
                let _ = engine.set_frame_position(orbit.frame, orbit.position(time));
                let _ = engine.set_emitter_input(
                    orbit.emitter,
                    InteractionInput::Speed,
                    orbit.velocity(),
                );
            }
        },
    )
}
