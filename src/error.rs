use std::{error, fmt, io};

use crate::{ClipId, EmitterId, FrameId};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by grainbrain.
///
/// Errors are only reported from configuration entry points. The real-time parts of the engine
/// never fail: they drop grains and count them in the engine's
/// [stats](crate::Engine::stats) instead.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ParameterError(String),
    ConfigurationError(String),
    ClipNotFound(ClipId),
    EmitterNotFound(EmitterId),
    FrameNotFound(FrameId),
    OutputDeviceError(Box<dyn error::Error + Send + Sync>),
    SendError(String),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::ConfigurationError(str) => write!(f, "Invalid configuration: {str}"),
            Self::ClipNotFound(clip_id) => write!(f, "Source clip with id {clip_id} not found"),
            Self::EmitterNotFound(emitter_id) => {
                write!(f, "Emitter with id {emitter_id} not found")
            }
            Self::FrameNotFound(frame_id) => write!(f, "Frame with id {frame_id} not found"),
            Self::OutputDeviceError(err) => err.fmt(f),
            Self::SendError(str) => write!(f, "Failed to send channel message: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(err: crossbeam_channel::SendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}

impl<T> From<crossbeam_channel::TrySendError<T>> for Error {
    fn from(err: crossbeam_channel::TrySendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}
