//! Burst emitters on frames which bounce on the floor. Each impact sends a collision event,
//! the burst's length and volume follow the collision force.

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use grainbrain::{
    dsp::{BitcrushEffect, ChopperEffect},
    AgeFade, CollisionEvent, EmitterConfig, EmitterId, EmitterParameters, EngineConfig, Error,
    FrameId, InteractionInput, Listener, ModulationParameter, Vec3,
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

const GRAVITY: f32 = 9.81;

/// A bouncing ball with a burst emitter.
struct Ball {
    frame: FrameId,
    emitter: EmitterId,
    position: Vec3,
    velocity: f32,
    restitution: f32,
    age: f32,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    // Parse optional arguments
    let args = arguments::parse();

    let config = EngineConfig::default()
        .speakers_allocated(8)
        .burst_start_offset_range_ms(4.0);
    let sample_rate = config.sample_rate;
    const LIFE_TIME: f32 = 8.0;

    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let mut last_position = 0u64;

    arguments::run(
        &args,
        config,
        Duration::from_secs(10),
        |engine| {
            engine.set_listener(Listener::new(Vec3::ZERO, 20.0));
            let clip = engine.add_clip(arguments::tone_clip(sample_rate, 1.0, 220.0))?;

            let parameters = EmitterParameters::burst()
                .volume(
                    ModulationParameter::new(0.0, 1.0, 0.8)
                        .start_end(0.9, 0.1)
                        .exponent(2.0),
                )
                .playhead(ModulationParameter::new(0.0, 1.0, 0.0).start_end(0.0, 0.4))
                .duration(ModulationParameter::new(5.0, 1000.0, 40.0).noise(0.3))
                .density(ModulationParameter::new(0.1, 32.0, 3.0))
                .transpose(
                    ModulationParameter::new(-4.0, 4.0, 0.0)
                        .start_end(0.5, -0.5)
                        .lock_noise(true)
                        .noise(0.2),
                )
                .length(
                    ModulationParameter::new(10.0, 5000.0, 100.0)
                        .start_end(80.0, 600.0)
                        .input(InteractionInput::CollisionForce, 0.0, 10.0),
                );

            let mut balls = Vec::new();
            for index in 0..8 {
                let angle = index as f32 / 8.0 * std::f32::consts::TAU;
                let distance = 2.0 + index as f32 * 2.0;
                let position = Vec3::new(
                    angle.cos() * distance,
                    3.0 + index as f32 * 0.5,
                    angle.sin() * distance,
                );
                let frame = engine.add_frame(position);
                let mut emitter = EmitterConfig::burst(frame, clip)
                    .seed(index as u64)
                    .parameters(parameters.clone())
                    .age_fade(AgeFade::new(0.0, 0.7))
                    .burst_trigger_threshold(0.5);
                if index % 2 == 1 {
                    emitter = emitter.dsp_chain(vec![
                        ChopperEffect::default().into(),
                        BitcrushEffect::new(4, 8, 0.5).into(),
                    ]);
                }
                balls.push(Ball {
                    frame,
                    emitter: engine.add_emitter(emitter)?,
                    position,
                    velocity: 0.0,
                    restitution: 0.75,
                    age: 0.0,
                });
            }
            Ok(balls)
        },
        |engine, balls, position| {
            let delta_time = (position - last_position) as f32 / sample_rate as f32;
            last_position = position;
            let collisions = engine.collision_sender();
            for ball in balls.iter_mut() {
                ball.age += delta_time;
                ball.velocity -= GRAVITY * delta_time;
                ball.position.y += ball.velocity * delta_time;
                if ball.position.y <= 0.0 && ball.velocity < 0.0 {
                    let force = -ball.velocity * rng.random_range(0.8..1.2);
                    ball.position.y = 0.0;
                    ball.velocity *= -ball.restitution;
                    collisions.send(CollisionEvent::new(ball.emitter, force, ball.velocity));
                }
                let _ = engine.set_frame_position(ball.frame, ball.position);
                let _ = engine.set_emitter_input(
                    ball.emitter,
                    InteractionInput::NormalizedAge,
                    ball.age / LIFE_TIME,
                );
            }
        },
    )
}
