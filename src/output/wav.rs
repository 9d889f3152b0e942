use std::{fs::File, io::BufWriter, path::Path, time::Duration};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{output::OutputDevice, Engine, Error, SpeakerMixer};

// -------------------------------------------------------------------------------------------------

/// Offline output, which renders an engine into a wav file as fast as possible.
///
/// Engine ticks and mixer blocks get interleaved, so the engine always schedules against an
/// audio clock which is exactly one block ahead of the last tick. Wav files contents are always
/// saved as 32bit floats.
pub struct WavOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
    channel_count: usize,
    sample_rate: u32,
    block_size: usize,
    buffer: Vec<f32>,
    position: u64,
}

impl WavOutput {
    /// Default number of frames rendered per engine tick.
    pub const DEFAULT_BLOCK_SIZE: usize = 512;

    /// Create a new wav file with the given mixer's sample rate and channel layout.
    pub fn create<P: AsRef<Path>>(file_path: P, mixer: &SpeakerMixer) -> Result<Self, Error> {
        let spec = WavSpec {
            channels: mixer.channel_count() as u16,
            sample_rate: mixer.sample_rate(),
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(file_path, spec)?;
        Ok(Self {
            writer: Some(writer),
            channel_count: mixer.channel_count(),
            sample_rate: mixer.sample_rate(),
            block_size: Self::DEFAULT_BLOCK_SIZE,
            buffer: Vec::new(),
            position: 0,
        })
    }

    /// Number of frames per engine tick.
    pub fn block_size(mut self, frames: usize) -> Self {
        self.block_size = frames.max(1);
        self
    }

    /// Render the given duration of audio.
    pub fn render(
        &mut self,
        engine: &mut Engine,
        mixer: &mut SpeakerMixer,
        duration: Duration,
    ) -> Result<(), Error> {
        self.render_with(engine, mixer, duration, |_, _| {})
    }

    /// Render the given duration of audio and call `before_tick` with the engine and the
    /// current output position in frames before every engine tick, e.g. to move frames or
    /// push collisions.
    pub fn render_with<F>(
        &mut self,
        engine: &mut Engine,
        mixer: &mut SpeakerMixer,
        duration: Duration,
        mut before_tick: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&mut Engine, u64),
    {
        if mixer.channel_count() != self.channel_count || mixer.sample_rate() != self.sample_rate
        {
            return Err(Error::ConfigurationError(format!(
                "Mixer layout ({} channels, {} Hz) does not match the wav file's layout \
                ({} channels, {} Hz)",
                mixer.channel_count(),
                mixer.sample_rate(),
                self.channel_count,
                self.sample_rate
            )));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::ConfigurationError(
                "Wav output got finalized already".to_string(),
            ));
        };

        let total_frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as u64;
        let end = self.position + total_frames;
        while self.position < end {
            let frames = (end - self.position).min(self.block_size as u64) as usize;
            before_tick(engine, self.position);
            engine.tick(Duration::from_secs_f64(
                frames as f64 / self.sample_rate as f64,
            ));
            self.buffer.resize(frames * self.channel_count, 0.0);
            mixer.process(&mut self.buffer);
            for sample in &self.buffer {
                writer.write_sample(*sample)?;
            }
            self.position += frames as u64;
        }
        Ok(())
    }

    /// Flush and close the wav file.
    pub fn finalize(mut self) -> Result<(), Error> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl OutputDevice for WavOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_position(&self) -> u64 {
        self.position
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                log::error!("Failed to finalize wav file: {err}");
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

// -------------------------------------------------------------------------------------------------
