use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use basedrop::{Collector, Owned};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{output::OutputDevice, Error, SpeakerMixer};

// -------------------------------------------------------------------------------------------------

const PREFERRED_SAMPLE_FORMAT: cpal::SampleFormat = cpal::SampleFormat::F32;
const PREFERRED_SAMPLE_RATE: cpal::SampleRate = cpal::SampleRate(44100);
const PREFERRED_CHANNELS: cpal::ChannelCount = 2;
const PREFERRED_BUFFER_SIZE: cpal::BufferSize = if cfg!(debug_assertions) {
    cpal::BufferSize::Default
} else {
    cpal::BufferSize::Fixed(1024)
};

// -------------------------------------------------------------------------------------------------

/// Real-time audio output on the system's default output device.
///
/// Configure the engine with the device's [`sample_rate`](OutputDevice::sample_rate) and
/// [`channel_count`](OutputDevice::channel_count), then hand over its mixer via
/// [`play`](Self::play). The engine ticks on the caller's thread.
///
/// Mixers which get replaced or stopped in the audio callback are freed on the caller's thread
/// with the next `play`, `stop`, `pause` or `resume` call.
pub struct CpalOutput {
    stream: cpal::Stream,
    collector: Collector,
    channel_count: usize,
    sample_rate: u32,
    playback_pos: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
    callback_send: Sender<CallbackMsg>,
}

impl CpalOutput {
    /// Open the default output device and start streaming silence.
    pub fn open() -> Result<Self, Error> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(cpal::DefaultStreamConfigError::DeviceNotAvailable)?;
        if let Ok(name) = device.name() {
            log::info!("Using audio device: {name}");
        }

        let supported = Self::preferred_output_config(&device)?;
        let config = cpal::StreamConfig {
            buffer_size: PREFERRED_BUFFER_SIZE,
            ..supported.config()
        };

        let playback_pos = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let (callback_send, callback_recv) = bounded(16);
        let collector = Collector::new();

        let mut callback = StreamCallback {
            callback_recv,
            mixer: None,
            channel_count: config.channels as usize,
            playback_pos: Arc::clone(&playback_pos),
            failed: Arc::clone(&failed),
        };

        log::info!("Opening output stream: {config:?}");
        let stream = device.build_output_stream(
            &config,
            move |output: &mut [f32], _| callback.write_samples(output),
            |err| log::error!("Audio output error: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self {
            stream,
            collector,
            channel_count: config.channels as usize,
            sample_rate: config.sample_rate.0,
            playback_pos,
            failed,
            callback_send,
        })
    }

    fn preferred_output_config(
        device: &cpal::Device,
    ) -> Result<cpal::SupportedStreamConfig, Error> {
        for s in device.supported_output_configs()? {
            let rates = s.min_sample_rate()..=s.max_sample_rate();
            if s.channels() == PREFERRED_CHANNELS
                && s.sample_format() == PREFERRED_SAMPLE_FORMAT
                && rates.contains(&PREFERRED_SAMPLE_RATE)
            {
                return Ok(s.with_sample_rate(PREFERRED_SAMPLE_RATE));
            }
        }
        Ok(device.default_output_config()?)
    }

    /// Play back the given mixer, replacing the current one.
    pub fn play(&mut self, mixer: SpeakerMixer) -> Result<(), Error> {
        if mixer.channel_count() != self.channel_count || mixer.sample_rate() != self.sample_rate
        {
            return Err(Error::ConfigurationError(format!(
                "Mixer layout ({} channels, {} Hz) does not match the device layout \
                ({} channels, {} Hz)",
                mixer.channel_count(),
                mixer.sample_rate(),
                self.channel_count,
                self.sample_rate
            )));
        }
        self.collector.collect();
        self.failed.store(false, Ordering::Relaxed);
        let mixer = Owned::new(&self.collector.handle(), mixer);
        self.callback_send.try_send(CallbackMsg::Play(mixer))?;
        Ok(())
    }

    /// Drop the current mixer and output silence.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.collector.collect();
        self.callback_send.try_send(CallbackMsg::Stop)?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), Error> {
        log::debug!("Pausing audio output stream");
        self.collector.collect();
        self.stream.pause()?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), Error> {
        log::debug!("Resuming audio output stream");
        self.collector.collect();
        self.stream.play()?;
        Ok(())
    }

    /// True when the mixer panicked in the audio callback and got dropped.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

impl OutputDevice for CpalOutput {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sample_position(&self) -> u64 {
        self.playback_pos.load(Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------------------------------------

enum CallbackMsg {
    Play(Owned<SpeakerMixer>),
    Stop,
}

struct StreamCallback {
    callback_recv: Receiver<CallbackMsg>,
    mixer: Option<Owned<SpeakerMixer>>,
    channel_count: usize,
    playback_pos: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
}

impl StreamCallback {
    fn write_samples(&mut self, output: &mut [f32]) {
        while let Ok(msg) = self.callback_recv.try_recv() {
            self.release_mixer();
            if let CallbackMsg::Play(mixer) = msg {
                self.mixer = Some(mixer);
            }
        }

        match self.mixer.as_mut() {
            Some(mixer) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| mixer.process(output)));
                if result.is_err() {
                    self.release_mixer();
                    self.failed.store(true, Ordering::Relaxed);
                    output.fill(0.0);
                }
            }
            None => output.fill(0.0),
        }

        self.playback_pos.fetch_add(
            (output.len() / self.channel_count.max(1)) as u64,
            Ordering::Relaxed,
        );
    }

    /// Hand back the mixer's grain slots, then the mixer itself to the output's collector.
    fn release_mixer(&mut self) {
        if let Some(mut mixer) = self.mixer.take() {
            mixer.release_grains();
        }
    }
}

// -------------------------------------------------------------------------------------------------

impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(err: cpal::DefaultStreamConfigError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::SupportedStreamConfigsError> for Error {
    fn from(err: cpal::SupportedStreamConfigsError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::BuildStreamError> for Error {
    fn from(err: cpal::BuildStreamError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::PlayStreamError> for Error {
    fn from(err: cpal::PlayStreamError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

impl From<cpal::PauseStreamError> for Error {
    fn from(err: cpal::PauseStreamError) -> Error {
        Error::OutputDeviceError(Box::new(err))
    }
}

// -------------------------------------------------------------------------------------------------
