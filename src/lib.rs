#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod attachment;
mod config;
mod emitter;
mod engine;
mod error;
mod mixer;
mod modulation;
mod output;
mod renderer;
mod scheduler;
mod stats;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use config::{EngineConfig, Listener};
pub use engine::{CollisionEvent, CollisionSender, Engine};
pub use mixer::SpeakerMixer;

pub use attachment::{speaker_radius, SpeakerPose, SpeakerState};
pub use emitter::{AgeFade, EmitterConfig, EmitterParameters, EmitterType};
pub use modulation::{InputGroup, InteractionInput, LimiterMode, ModulationParameter};
pub use renderer::{GrainWindowMode, GRAIN_WINDOW_SIZE};
pub use scheduler::GrainDescriptor;
pub use stats::{EngineStatsSnapshot, GrainDiscardReason};

pub use output::OutputDevice;

pub use glam::Vec3;

/// Id of an emitter within an [`Engine`].
pub type EmitterId = usize;
/// Id of a frame (an emitter anchor in world space) within an [`Engine`].
pub type FrameId = usize;
/// Id of a speaker: its index in the engine's speaker pool.
pub type SpeakerId = usize;
/// Id of a source clip within an [`Engine`].
pub type ClipId = usize;

// public mods
pub mod dsp;
pub mod utils;

pub mod outputs {
    //! Audio outputs which play back or render a [`SpeakerMixer`](super::SpeakerMixer).

    #[cfg(feature = "cpal-output")]
    pub use super::output::cpal::CpalOutput;
    #[cfg(feature = "wav-output")]
    pub use super::output::wav::WavOutput;
}
