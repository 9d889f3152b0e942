use glam::Vec3;

use crate::SpeakerId;

// -------------------------------------------------------------------------------------------------

/// Lifecycle state of a speaker.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum SpeakerState {
    /// Unused, parked and available for activation.
    #[default]
    Pooled,
    /// Hosts at least one frame.
    Active,
    /// Lost its last frame recently. Can be reused until the linger time passed.
    Lingering,
}

// -------------------------------------------------------------------------------------------------

/// Capture radius of a speaker at the given distance from the listener, so that the capture
/// area spans a constant angle as seen from the listener.
#[inline]
pub fn speaker_radius(arc_degrees: f32, distance: f32) -> f32 {
    arc_degrees * distance * (std::f32::consts::TAU / 360.0)
}

// -------------------------------------------------------------------------------------------------

/// A spatial output voice, which mixes the grains of all frames attached to it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Speaker {
    pub id: SpeakerId,
    pub state: SpeakerState,
    pub position: Vec3,
    pub radius: f32,
    pub host_count: usize,
    /// Seconds since the speaker lost its last host.
    pub inactive_duration: f32,
    /// Ratio of used grain slots, 0..=1.
    pub grain_load: f32,
}

impl Speaker {
    /// Position of pooled speakers, far away from everything.
    pub const PARKED_POSITION: Vec3 = Vec3::splat(-1.0e6);
    /// Radius of pooled speakers.
    pub const PARKED_RADIUS: f32 = 0.001;

    pub fn new(id: SpeakerId) -> Self {
        Self {
            id,
            state: SpeakerState::Pooled,
            position: Self::PARKED_POSITION,
            radius: Self::PARKED_RADIUS,
            host_count: 0,
            inactive_duration: 0.0,
            grain_load: 0.0,
        }
    }

    /// True when the speaker can take another host at the given position.
    #[inline]
    pub fn accepts(&self, position: Vec3, busy_load_limit: f32) -> bool {
        matches!(self.state, SpeakerState::Active | SpeakerState::Lingering)
            && self.grain_load <= busy_load_limit
            && self.contains(position)
    }

    #[inline]
    pub fn contains(&self, position: Vec3) -> bool {
        self.position.distance(position) <= self.radius
    }

    /// Return the speaker to the pool.
    pub fn park(&mut self) {
        self.state = SpeakerState::Pooled;
        self.position = Self::PARKED_POSITION;
        self.radius = Self::PARKED_RADIUS;
        self.inactive_duration = 0.0;
    }

    pub fn pose(&self) -> SpeakerPose {
        SpeakerPose {
            id: self.id,
            state: self.state,
            position: self.position,
            radius: self.radius,
            grain_load: self.grain_load,
            host_count: self.host_count,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Public snapshot of a speaker, e.g. to visualize it or to move emitter visuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerPose {
    pub id: SpeakerId,
    pub state: SpeakerState,
    pub position: Vec3,
    pub radius: f32,
    pub grain_load: f32,
    pub host_count: usize,
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_is_linear_in_distance() {
        assert!((speaker_radius(10.0, 20.0) - 2.0 * speaker_radius(10.0, 10.0)).abs() < 1e-5);
        assert!((speaker_radius(10.0, 10.0) - 1.745_329).abs() < 1e-5);
        assert_eq!(speaker_radius(10.0, 0.0), 0.0);
    }

    #[test]
    fn pooled_speakers_accept_nothing() {
        let mut speaker = Speaker::new(0);
        assert!(!speaker.accepts(Speaker::PARKED_POSITION, 1.0));
        speaker.state = SpeakerState::Active;
        speaker.position = Vec3::ZERO;
        speaker.radius = 1.0;
        assert!(speaker.accepts(Vec3::new(0.5, 0.0, 0.0), 0.6));
        assert!(!speaker.accepts(Vec3::new(1.5, 0.0, 0.0), 0.6));
        speaker.grain_load = 0.7;
        assert!(!speaker.accepts(Vec3::new(0.5, 0.0, 0.0), 0.6));
        speaker.park();
        assert_eq!(speaker.state, SpeakerState::Pooled);
        assert_eq!(speaker.position, Speaker::PARKED_POSITION);
    }
}
