use glam::Vec3;

use crate::{FrameId, SpeakerId};

// -------------------------------------------------------------------------------------------------

/// Spatial anchor of one or more emitters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub id: FrameId,
    pub position: Vec3,
    pub in_listener_radius: bool,
    pub speaker: Option<SpeakerId>,
}

impl Frame {
    pub fn new(id: FrameId, position: Vec3) -> Self {
        Self {
            id,
            position,
            in_listener_radius: false,
            speaker: None,
        }
    }

    /// True for frames which are in range of the listener but have no speaker.
    #[inline]
    pub fn is_unconnected(&self) -> bool {
        self.in_listener_radius && self.speaker.is_none()
    }
}

// -------------------------------------------------------------------------------------------------

/// Deferred change of a frame's attachment state, computed from a snapshot by a pass and
/// applied at the pass boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameCommand {
    /// Index of the frame in the attachment system's frame list.
    pub frame: usize,
    pub in_listener_radius: bool,
    pub speaker: Option<SpeakerId>,
}

impl FrameCommand {
    pub fn attach(frame: usize, speaker: SpeakerId) -> Self {
        Self {
            frame,
            in_listener_radius: true,
            speaker: Some(speaker),
        }
    }

    pub fn apply(&self, frame: &mut Frame) {
        frame.in_listener_radius = self.in_listener_radius;
        frame.speaker = self.speaker;
    }
}
