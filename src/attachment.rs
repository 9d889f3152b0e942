//! Dynamic assignment of frames to a fixed pool of speakers.

use std::collections::HashMap;

use glam::Vec3;

use crate::{config::Listener, EngineConfig, Error, FrameId, SpeakerId};

// -------------------------------------------------------------------------------------------------

mod frame;
mod passes;
mod speaker;

pub(crate) use frame::Frame;
pub use speaker::{speaker_radius, SpeakerPose, SpeakerState};

pub(crate) use speaker::Speaker;

use frame::FrameCommand;
use passes::AttachmentSettings;

// -------------------------------------------------------------------------------------------------

/// Owns all frames and speakers and runs the attachment passes once per engine tick.
///
/// Speaker ids are indices into the fixed speaker pool. Frames are stored densely: the frame
/// id to index map gets patched on removals.
pub(crate) struct AttachmentSystem {
    settings: AttachmentSettings,
    speakers: Vec<Speaker>,
    frames: Vec<Frame>,
    frame_indices: HashMap<FrameId, usize>,
    commands: Vec<FrameCommand>,
    centroids: Vec<(Vec3, usize)>,
    activated: Vec<SpeakerId>,
}

impl AttachmentSystem {
    pub fn new(config: &EngineConfig) -> Self {
        let speakers = (0..config.speakers_allocated).map(Speaker::new).collect();
        Self {
            settings: AttachmentSettings::from(config),
            speakers,
            frames: Vec::new(),
            frame_indices: HashMap::new(),
            commands: Vec::new(),
            centroids: Vec::with_capacity(config.speakers_allocated),
            activated: Vec::with_capacity(config.speakers_allocated),
        }
    }

    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frame_indices.get(&id).map(|index| &self.frames[*index])
    }

    pub fn add_frame(&mut self, id: FrameId, position: Vec3) {
        debug_assert!(!self.frame_indices.contains_key(&id), "Duplicate frame id");
        self.frame_indices.insert(id, self.frames.len());
        self.frames.push(Frame::new(id, position));
    }

    pub fn remove_frame(&mut self, id: FrameId) -> Result<(), Error> {
        let index = self
            .frame_indices
            .remove(&id)
            .ok_or(Error::FrameNotFound(id))?;
        let frame = self.frames.swap_remove(index);
        if let Some(moved) = self.frames.get(index) {
            self.frame_indices.insert(moved.id, index);
        }
        if let Some(speaker) = frame.speaker.and_then(|id| self.speakers.get_mut(id)) {
            speaker.host_count = speaker.host_count.saturating_sub(1);
        }
        Ok(())
    }

    pub fn set_frame_position(&mut self, id: FrameId, position: Vec3) -> Result<(), Error> {
        let index = self.frame_indices.get(&id).ok_or(Error::FrameNotFound(id))?;
        self.frames[*index].position = position;
        Ok(())
    }

    /// Update the speaker's grain load as reported by its grain pool.
    pub fn set_grain_load(&mut self, speaker: SpeakerId, load: f32) {
        if let Some(speaker) = self.speakers.get_mut(speaker) {
            speaker.grain_load = load;
        }
    }

    /// Run the first pass only. Returns the number of frames which changed their state.
    pub fn check_range(&mut self, listener: &Listener) -> usize {
        passes::range_check(&self.frames, &self.speakers, listener, &mut self.commands);
        self.apply_commands()
    }

    /// Run all passes for a tick of `delta_time` seconds.
    pub fn update(&mut self, listener: &Listener, delta_time: f32) {
        self.check_range(listener);

        passes::group_lone_frames(
            &self.frames,
            &self.speakers,
            &self.settings,
            &mut self.commands,
        );
        self.apply_commands();

        passes::connect_frames(
            &self.frames,
            &self.speakers,
            &self.settings,
            &mut self.commands,
        );
        self.apply_commands();

        passes::reposition_speakers(
            &self.frames,
            &mut self.speakers,
            listener,
            &self.settings,
            delta_time,
            &mut self.centroids,
        );

        passes::activate_pooled_speakers(
            &mut self.frames,
            &mut self.speakers,
            listener,
            &self.settings,
            &mut self.activated,
        );
    }

    fn apply_commands(&mut self) -> usize {
        for command in &self.commands {
            command.apply(&mut self.frames[command.frame]);
        }
        if !self.commands.is_empty() {
            self.count_hosts();
        }
        self.commands.len()
    }

    fn count_hosts(&mut self) {
        for speaker in &mut self.speakers {
            speaker.host_count = 0;
        }
        for frame in &self.frames {
            if let Some(speaker) = frame.speaker.and_then(|id| self.speakers.get_mut(id)) {
                speaker.host_count += 1;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn system(speakers: usize) -> AttachmentSystem {
        AttachmentSystem::new(
            &EngineConfig::default()
                .speakers_allocated(speakers)
                .speaker_position_smoothing(0.0)
                .speaker_linger_time(0.5),
        )
    }

    fn active_count(system: &AttachmentSystem) -> usize {
        system
            .speakers()
            .iter()
            .filter(|speaker| speaker.state == SpeakerState::Active)
            .count()
    }

    const DT: f32 = 0.02;

    #[test]
    fn single_speaker_pool_gets_shared() {
        // 10 units away from the listener the radius is ~1.75
        let listener = Listener::new(Vec3::ZERO, 30.0);
        let mut system = system(1);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.add_frame(1, Vec3::new(10.0, 1.0, 0.0));
        for _ in 0..10 {
            system.update(&listener, DT);
            assert!(active_count(&system) <= 1);
        }
        assert_eq!(system.frame(0).and_then(|f| f.speaker), Some(0));
        assert_eq!(system.frame(1).and_then(|f| f.speaker), Some(0));
        assert_eq!(system.speakers()[0].host_count, 2);
        // the speaker sits at the hosts' centroid
        assert!(system.speakers()[0]
            .position
            .abs_diff_eq(Vec3::new(10.0, 0.5, 0.0), 1e-4));
    }

    #[test]
    fn single_speaker_pool_exhausted() {
        let listener = Listener::new(Vec3::ZERO, 30.0);
        let mut system = system(1);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.add_frame(1, Vec3::new(-10.0, 0.0, 0.0));
        for _ in 0..10 {
            system.update(&listener, DT);
            assert!(active_count(&system) <= 1);
        }
        assert_eq!(system.frame(0).and_then(|f| f.speaker), Some(0));
        assert_eq!(system.frame(1).and_then(|f| f.speaker), None);
        assert!(system.frame(1).is_some_and(|f| f.is_unconnected()));
    }

    #[test]
    fn close_frames_share_a_fresh_speaker() {
        let listener = Listener::default();
        let mut system = system(4);
        system.add_frame(0, Vec3::new(0.0, 0.0, 10.0));
        system.add_frame(1, Vec3::new(0.0, 0.5, 10.0));
        system.add_frame(2, Vec3::new(0.0, 1.0, 10.0));
        system.update(&listener, DT);
        assert_eq!(active_count(&system), 1);
        assert!(system
            .frames()
            .iter()
            .all(|frame| frame.speaker == Some(0)));
    }

    #[test]
    fn range_check_is_idempotent() {
        let mut listener = Listener::new(Vec3::ZERO, 30.0);
        let mut system = system(4);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.add_frame(1, Vec3::new(20.0, 0.0, 0.0));
        system.add_frame(2, Vec3::new(50.0, 0.0, 0.0));
        system.update(&listener, DT);
        assert_eq!(system.check_range(&listener), 0);

        // move a frame out of its speaker's radius and the listener away from another
        system.set_frame_position(0, Vec3::new(10.0, 5.0, 0.0)).unwrap();
        listener.radius = 15.0;
        assert_eq!(system.check_range(&listener), 2);
        assert_eq!(system.frame(0).and_then(|f| f.speaker), None);
        assert!(system.frame(0).is_some_and(|f| f.in_listener_radius));
        assert!(system.frame(1).is_some_and(|f| !f.in_listener_radius));
        assert_eq!(system.check_range(&listener), 0);
    }

    #[test]
    fn lone_frames_regroup() {
        let listener = Listener::default();
        let mut system = system(4);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.add_frame(1, Vec3::new(0.0, 0.0, 10.0));
        system.update(&listener, DT);
        assert_eq!(active_count(&system), 2);
        let second = system.frame(1).and_then(|f| f.speaker).unwrap();
        assert_ne!(second, 0);

        // frame 1 and its speaker move into speaker 0's radius: the frame leaves its own
        // speaker for the lower id
        system.set_frame_position(1, Vec3::new(10.0, 0.0, 0.5)).unwrap();
        system.speakers[second].position = Vec3::new(10.0, 0.0, 0.5);
        system.update(&listener, DT);
        assert_eq!(system.frame(1).and_then(|f| f.speaker), Some(0));
        assert_eq!(system.speakers()[0].host_count, 2);
        assert_eq!(system.speakers()[second].state, SpeakerState::Lingering);
    }

    #[test]
    fn busy_speakers_refuse_hosts() {
        let listener = Listener::default();
        let mut system = system(2);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.update(&listener, DT);
        system.set_grain_load(0, 0.9);
        system.add_frame(1, Vec3::new(10.0, 0.2, 0.0));
        system.update(&listener, DT);
        assert_eq!(system.frame(1).and_then(|f| f.speaker), Some(1));
    }

    #[test]
    fn speakers_linger_then_pool() {
        let listener = Listener::default();
        let mut system = system(2);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.update(&listener, DT);
        assert_eq!(system.speakers()[0].state, SpeakerState::Active);

        system.remove_frame(0).unwrap();
        system.update(&listener, DT);
        assert_eq!(system.speakers()[0].state, SpeakerState::Lingering);

        // a new frame in range reuses the lingering speaker
        system.add_frame(1, Vec3::new(10.0, 0.5, 0.0));
        system.update(&listener, DT);
        assert_eq!(system.frame(1).and_then(|f| f.speaker), Some(0));
        assert_eq!(system.speakers()[0].state, SpeakerState::Active);

        system.remove_frame(1).unwrap();
        for _ in 0..30 {
            system.update(&listener, DT);
        }
        assert_eq!(system.speakers()[0].state, SpeakerState::Pooled);
        assert_eq!(system.speakers()[0].position, Speaker::PARKED_POSITION);
        assert!(system.remove_frame(1).is_err());
    }

    #[test]
    fn radius_follows_listener_distance() {
        let listener = Listener::default();
        let mut system = system(2);
        system.add_frame(0, Vec3::new(10.0, 0.0, 0.0));
        system.add_frame(1, Vec3::new(0.0, 0.0, 1.0));
        system.update(&listener, DT);
        let near = &system.speakers()[system.frame(1).and_then(|f| f.speaker).unwrap()];
        assert_eq!(near.radius, 0.25);
        let far = &system.speakers()[system.frame(0).and_then(|f| f.speaker).unwrap()];
        assert!((far.radius - speaker_radius(10.0, 10.0)).abs() < 1e-4);
    }
}
