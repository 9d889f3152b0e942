//! The attachment passes. Each parallel pass reads a snapshot of frames and speakers and emits
//! [`FrameCommand`]s, which get applied before the next pass starts.

use std::cmp::Ordering;

use glam::Vec3;
use rayon::prelude::*;

use crate::{config::Listener, EngineConfig, SpeakerId};

use super::{
    frame::{Frame, FrameCommand},
    speaker::{speaker_radius, Speaker, SpeakerState},
};

// -------------------------------------------------------------------------------------------------

/// Speaker related subset of the engine config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AttachmentSettings {
    pub linger_time: f32,
    pub busy_load_limit: f32,
    pub arc_degrees: f32,
    pub min_radius: f32,
    pub position_smoothing: f32,
}

impl AttachmentSettings {
    /// Capture radius of a speaker at the given listener distance.
    pub fn radius(&self, distance: f32) -> f32 {
        speaker_radius(self.arc_degrees, distance).max(self.min_radius)
    }

    /// Interpolation factor for moving a speaker towards its host centroid.
    fn smoothing_factor(&self, delta_time: f32) -> f32 {
        if self.position_smoothing <= 0.0 {
            1.0
        } else {
            1.0 - (-delta_time / self.position_smoothing).exp()
        }
    }
}

impl From<&EngineConfig> for AttachmentSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            linger_time: config.speaker_linger_time,
            busy_load_limit: config.speaker_busy_load_limit,
            arc_degrees: config.speaker_attach_arc_degrees,
            min_radius: config.speaker_min_radius,
            position_smoothing: config.speaker_position_smoothing,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Pass 1: update the listener flags and detach frames which left the listener's radius, whose
/// speaker got pooled, or which moved out of their speaker's radius.
pub(crate) fn range_check(
    frames: &[Frame],
    speakers: &[Speaker],
    listener: &Listener,
    commands: &mut Vec<FrameCommand>,
) {
    commands.clear();
    commands.par_extend(frames.par_iter().enumerate().filter_map(|(index, frame)| {
        let in_listener_radius = listener.contains(frame.position);
        let speaker = frame.speaker.filter(|id| {
            in_listener_radius
                && speakers.get(*id).is_some_and(|speaker| {
                    speaker.state != SpeakerState::Pooled && speaker.contains(frame.position)
                })
        });
        if in_listener_radius != frame.in_listener_radius || speaker != frame.speaker {
            Some(FrameCommand {
                frame: index,
                in_listener_radius,
                speaker,
            })
        } else {
            None
        }
    }));
}

// -------------------------------------------------------------------------------------------------

/// Ranks speakers for regrouping: shorter inactivity first, then more hosts, then lower ids.
fn preference(a: &Speaker, b: &Speaker) -> Ordering {
    a.inactive_duration
        .total_cmp(&b.inactive_duration)
        .then(b.host_count.cmp(&a.host_count))
        .then(a.id.cmp(&b.id))
}

/// Pass 2: move frames which are the only host of their speaker to a preferable, active speaker
/// in range, so speakers get shared instead of fragmented.
pub(crate) fn group_lone_frames(
    frames: &[Frame],
    speakers: &[Speaker],
    settings: &AttachmentSettings,
    commands: &mut Vec<FrameCommand>,
) {
    commands.clear();
    commands.par_extend(frames.par_iter().enumerate().filter_map(|(index, frame)| {
        let current = speakers.get(frame.speaker?)?;
        if current.host_count != 1 {
            return None;
        }
        speakers
            .iter()
            .filter(|target| {
                target.id != current.id
                    && target.state == SpeakerState::Active
                    && target.grain_load <= settings.busy_load_limit
                    && target.contains(frame.position)
                    && preference(target, current) == Ordering::Less
            })
            .min_by(|a, b| preference(a, b))
            .map(|target| FrameCommand::attach(index, target.id))
    }));
}

// -------------------------------------------------------------------------------------------------

/// Pass 3: connect unconnected frames to the nearest active or lingering speaker which is not
/// busy and in range.
pub(crate) fn connect_frames(
    frames: &[Frame],
    speakers: &[Speaker],
    settings: &AttachmentSettings,
    commands: &mut Vec<FrameCommand>,
) {
    commands.clear();
    commands.par_extend(frames.par_iter().enumerate().filter_map(|(index, frame)| {
        if !frame.is_unconnected() {
            return None;
        }
        speakers
            .iter()
            .filter(|speaker| speaker.accepts(frame.position, settings.busy_load_limit))
            .min_by(|a, b| {
                a.position
                    .distance_squared(frame.position)
                    .total_cmp(&b.position.distance_squared(frame.position))
            })
            .map(|speaker| FrameCommand::attach(index, speaker.id))
    }));
}

// -------------------------------------------------------------------------------------------------

/// Pass 4: move hosting speakers towards their hosts' centroid and update the state machine of
/// speakers without hosts.
pub(crate) fn reposition_speakers(
    frames: &[Frame],
    speakers: &mut [Speaker],
    listener: &Listener,
    settings: &AttachmentSettings,
    delta_time: f32,
    centroids: &mut Vec<(Vec3, usize)>,
) {
    centroids.clear();
    centroids.resize(speakers.len(), (Vec3::ZERO, 0));
    for frame in frames {
        if let Some(centroid) = frame.speaker.and_then(|id| centroids.get_mut(id)) {
            centroid.0 += frame.position;
            centroid.1 += 1;
        }
    }
    speakers
        .par_iter_mut()
        .zip(centroids.par_iter())
        .for_each(|(speaker, (sum, count))| {
            speaker.host_count = *count;
            if *count > 0 {
                let target = *sum / *count as f32;
                if speaker.state != SpeakerState::Active {
                    log::debug!("Speaker #{} got reactivated", speaker.id);
                }
                let factor = settings.smoothing_factor(delta_time);
                speaker.position = speaker.position.lerp(target, factor);
                speaker.state = SpeakerState::Active;
                speaker.inactive_duration = 0.0;
                speaker.radius = settings.radius(listener.position.distance(speaker.position));
                return;
            }
            match speaker.state {
                SpeakerState::Pooled => (),
                SpeakerState::Active => {
                    log::debug!("Speaker #{} is lingering", speaker.id);
                    speaker.state = SpeakerState::Lingering;
                    speaker.inactive_duration = delta_time;
                    speaker.radius = settings.radius(listener.position.distance(speaker.position));
                }
                SpeakerState::Lingering => {
                    speaker.inactive_duration += delta_time;
                    if speaker.inactive_duration >= settings.linger_time {
                        log::debug!("Speaker #{} returned to the pool", speaker.id);
                        speaker.park();
                    } else {
                        speaker.radius =
                            settings.radius(listener.position.distance(speaker.position));
                    }
                }
            }
        });
}

// -------------------------------------------------------------------------------------------------

/// Pass 5: activate pooled speakers for frames which are still unconnected. Runs serially: a
/// frame first tries to join a speaker activated earlier in this pass, so close frames share a
/// fresh speaker instead of draining the pool.
pub(crate) fn activate_pooled_speakers(
    frames: &mut [Frame],
    speakers: &mut [Speaker],
    listener: &Listener,
    settings: &AttachmentSettings,
    activated: &mut Vec<SpeakerId>,
) {
    activated.clear();
    for frame in frames.iter_mut().filter(|frame| frame.is_unconnected()) {
        let joined = activated.iter().copied().find(|id| {
            let speaker = &speakers[*id];
            speaker.grain_load <= settings.busy_load_limit && speaker.contains(frame.position)
        });
        let speaker_id = match joined {
            Some(id) => id,
            None => {
                let Some(speaker) = speakers
                    .iter_mut()
                    .find(|speaker| speaker.state == SpeakerState::Pooled)
                else {
                    log::trace!("No pooled speaker left for frame #{}", frame.id);
                    continue;
                };
                log::debug!("Activating speaker #{} for frame #{}", speaker.id, frame.id);
                speaker.state = SpeakerState::Active;
                speaker.position = frame.position;
                speaker.radius = settings.radius(listener.position.distance(frame.position));
                speaker.inactive_duration = 0.0;
                speaker.host_count = 0;
                activated.push(speaker.id);
                speaker.id
            }
        };
        frame.speaker = Some(speaker_id);
        speakers[speaker_id].host_count += 1;
    }
}
