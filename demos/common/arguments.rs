use std::{path::PathBuf, time::Duration};

use arg::{parse_args, Args};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use grainbrain::{outputs::WavOutput, Engine, EngineConfig, Error};

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const DEFAULT_OUTPUT_PATH: &str = "grainbrain-demo.wav";

// -------------------------------------------------------------------------------------------------

/// Default program arguments for grainbrain demo applications.
#[derive(Args, Debug, Default)]
#[allow(unused)]
pub struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Write audio output into the given wav file. When the \"cpal-output\" feature is enabled
    /// and no file is given, audio plays back on the default audio device.
    pub output_path: Option<PathBuf>,
    #[arg(short = "d", long = "duration")]
    /// Length of the rendered audio in seconds.
    pub duration: Option<f32>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    pub log_level: Option<log::Level>,
}

/// Parse common demo arguments and apply the log-level arg to the logger
#[allow(unused)]
pub fn parse() -> Arguments {
    // Parse args
    let args = parse_args::<Arguments>();

    create_logger(args.log_level);
    args
}

// -------------------------------------------------------------------------------------------------

/// Create default logger from arguments. Invoked from `parse`.
#[allow(unused)]
pub fn create_logger(log_level: Option<log::Level>) {
    // Init logger
    simple_logger::SimpleLogger::new()
        // use default or arg level by default
        .with_level(log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        // disable logging in chatty modules
        .with_module_level("audio_thread_priority", log::LevelFilter::Warn)
        .init()
        .expect("Failed to set logger");
}

// -------------------------------------------------------------------------------------------------

/// Create an engine with the given config, set it up and run it for the configured duration,
/// calling `update` with the current output position in frames before every engine tick.
#[allow(unused)]
pub fn run<T, S, U>(
    args: &Arguments,
    config: EngineConfig,
    default_duration: Duration,
    setup: S,
    mut update: U,
) -> Result<(), Error>
where
    S: FnOnce(&mut Engine) -> Result<T, Error>,
    U: FnMut(&mut Engine, &mut T, u64),
{
    let duration = args
        .duration
        .map(Duration::from_secs_f32)
        .unwrap_or(default_duration);

    #[cfg(feature = "cpal-output")]
    if args.output_path.is_none() {
        return run_realtime(config, duration, setup, update);
    }

    let output_path = args
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));

    let (mut engine, mut mixer) = Engine::new(config)?;
    let mut state = setup(&mut engine)?;

    let mut output = WavOutput::create(&output_path, &mixer)?;
    output.render_with(&mut engine, &mut mixer, duration, |engine, position| {
        update(engine, &mut state, position)
    })?;
    output.finalize()?;

    println!("Rendered {:.1}s into '{}'", duration.as_secs_f32(), output_path.display());
    println!("{:#?}", engine.stats());
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn run_realtime<T, S, U>(
    config: EngineConfig,
    duration: Duration,
    setup: S,
    mut update: U,
) -> Result<(), Error>
where
    S: FnOnce(&mut Engine) -> Result<T, Error>,
    U: FnMut(&mut Engine, &mut T, u64),
{
    use grainbrain::{outputs::CpalOutput, OutputDevice};
    use std::time::Instant;

    let mut output = CpalOutput::open()?;
    let config = config
        .sample_rate(output.sample_rate())
        .channel_count(output.channel_count());

    let (mut engine, mixer) = Engine::new(config)?;
    let mut state = setup(&mut engine)?;
    output.play(mixer)?;

    let start = Instant::now();
    let mut last_tick = start;
    while start.elapsed() < duration {
        let now = Instant::now();
        update(&mut engine, &mut state, output.sample_position());
        engine.tick(now - last_tick);
        last_tick = now;
        std::thread::sleep(Duration::from_millis(5));
    }
    output.stop()?;

    println!("{:#?}", engine.stats());
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// A synthetic source clip: a decaying, slightly detuned harmonic tone with a noisy attack.
#[allow(unused)]
pub fn tone_clip(sample_rate: u32, seconds: f32, frequency: f32) -> Vec<f32> {
    let len = (sample_rate as f32 * seconds) as usize;
    let mut rng = SmallRng::seed_from_u64(0x2545_f491);
    (0..len)
        .map(|index| {
            let time = index as f32 / sample_rate as f32;
            let phase = std::f32::consts::TAU * frequency * time;
            let tone = phase.sin() * 0.6
                + (phase * 2.01).sin() * 0.25
                + (phase * 3.02).sin() * 0.15;
            let noise = rng.random_range(-1.0..=1.0f32);
            let attack = (-time * 30.0).exp();
            let decay = (-time * 1.5).exp();
            (tone * decay + noise * attack * 0.5) * 0.8
        })
        .collect()
}
