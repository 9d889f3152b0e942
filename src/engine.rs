use std::{collections::HashMap, sync::Arc, time::Duration};

use crossbeam_queue::ArrayQueue;
use glam::Vec3;

use crate::{
    attachment::{AttachmentSystem, SpeakerPose, SpeakerState},
    emitter::{Emitter, EmitterConfig, EmitterRenderer},
    mixer::SpeakerMixer,
    modulation::InteractionInput,
    scheduler::ScheduleContext,
    stats::{EngineStats, EngineStatsSnapshot},
    utils::{clamp01, panning_factors, time::AudioClock},
    voice::SpeakerGrainPool,
    ClipId, EmitterId, EngineConfig, Error, FrameId, Listener, SpeakerId,
};

// -------------------------------------------------------------------------------------------------

mod thread_pool;

use thread_pool::EmitterThreadPool;

// -------------------------------------------------------------------------------------------------

/// A collision of an emitter's frame, as reported by a physics collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub emitter: EmitterId,
    /// Collision impulse. Burst emitters trigger when it exceeds their threshold.
    pub force: f32,
    /// Relative speed of the collision.
    pub speed: f32,
}

impl CollisionEvent {
    pub fn new(emitter: EmitterId, force: f32, speed: f32) -> Self {
        Self {
            emitter,
            force,
            speed,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Cloneable, thread safe handle to push collision events into an [`Engine`].
///
/// Events get applied in the engine's next [`tick`](Engine::tick). When the bounded event
/// queue is full, new events get dropped and counted in the engine's stats.
#[derive(Clone)]
pub struct CollisionSender {
    queue: Arc<ArrayQueue<CollisionEvent>>,
    stats: Arc<EngineStats>,
}

impl CollisionSender {
    /// Queue a collision event. Returns false when the event got dropped.
    pub fn send(&self, event: CollisionEvent) -> bool {
        if self.queue.push(event).is_err() {
            self.stats.add_dropped_collision();
            return false;
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// The simulation side of grainbrain.
///
/// Owns source clips, frames, emitters and the speaker attachment state. Call
/// [`tick`](Self::tick) once per simulation frame: it attaches frames to speakers, spatializes
/// the speakers and lets all emitters schedule and render their next grains into the speakers'
/// grain slots, which the [`SpeakerMixer`] returned by [`Engine::new`] plays back.
pub struct Engine {
    config: EngineConfig,
    listener: Listener,
    clips: HashMap<ClipId, Arc<[f32]>>,
    next_clip_id: ClipId,
    next_frame_id: FrameId,
    next_emitter_id: EmitterId,
    attachments: AttachmentSystem,
    emitters: Vec<Emitter>,
    emitter_indices: HashMap<EmitterId, usize>,
    collisions: Arc<ArrayQueue<CollisionEvent>>,
    pool: SpeakerGrainPool,
    clock: AudioClock,
    stats: Arc<EngineStats>,
    renderer: EmitterRenderer,
    thread_pool: Option<EmitterThreadPool>,
}

impl Engine {
    /// Create a new engine and the mixer which plays back its grains.
    pub fn new(config: EngineConfig) -> Result<(Self, SpeakerMixer), Error> {
        config.validate()?;

        let pool = SpeakerGrainPool::new(
            config.speakers_allocated,
            config.grains_per_speaker,
            config.max_grain_samples(),
        );
        let clock = AudioClock::new();
        let stats = EngineStats::new();

        let mixer = SpeakerMixer::new(
            &pool,
            clock.clone(),
            Arc::clone(&stats),
            config.sample_rate,
            config.channel_count,
            config.discard_threshold_samples(),
        );

        let create_renderer = || {
            EmitterRenderer::new(
                pool.clone(),
                clock.clone(),
                Arc::clone(&stats),
                config.max_grain_samples(),
            )
        };
        let renderer = create_renderer();
        let thread_pool = if config.worker_thread_count >= 2 {
            Some(EmitterThreadPool::new(&config, create_renderer)?)
        } else {
            None
        };

        log::info!(
            "Created engine with {} speakers of {} grain slots at {} Hz",
            config.speakers_allocated,
            config.grains_per_speaker,
            config.sample_rate
        );

        let engine = Self {
            listener: Listener::default(),
            clips: HashMap::new(),
            next_clip_id: 0,
            next_frame_id: 0,
            next_emitter_id: 0,
            attachments: AttachmentSystem::new(&config),
            emitters: Vec::new(),
            emitter_indices: HashMap::new(),
            collisions: Arc::new(ArrayQueue::new(config.collision_queue_capacity)),
            pool,
            clock,
            stats,
            renderer,
            thread_pool,
            config,
        };
        Ok((engine, mixer))
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The audio clock, as advanced by the engine's mixer.
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn listener(&self) -> Listener {
        self.listener
    }

    /// Move the listener. Applied in the next tick.
    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    /// Register a mono source clip at the engine's sample rate.
    pub fn add_clip<S: Into<Arc<[f32]>>>(&mut self, samples: S) -> Result<ClipId, Error> {
        let samples = samples.into();
        if samples.is_empty() {
            return Err(Error::ParameterError(
                "Source clips must not be empty".to_string(),
            ));
        }
        let id = self.next_clip_id;
        self.next_clip_id += 1;
        log::info!("Added source clip #{id} with {} samples", samples.len());
        self.clips.insert(id, samples);
        Ok(id)
    }

    /// Remove a source clip. Emitters which use the clip keep playing it.
    pub fn remove_clip(&mut self, clip: ClipId) -> Result<(), Error> {
        self.clips
            .remove(&clip)
            .map(|_| ())
            .ok_or(Error::ClipNotFound(clip))
    }

    /// Add a frame, an anchor in world space emitters can be attached to.
    pub fn add_frame(&mut self, position: Vec3) -> FrameId {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        self.attachments.add_frame(id, position);
        id
    }

    /// Remove a frame and all emitters which are attached to it.
    pub fn remove_frame(&mut self, frame: FrameId) -> Result<(), Error> {
        self.attachments.remove_frame(frame)?;
        let orphans = self
            .emitters
            .iter()
            .filter(|emitter| emitter.frame() == frame)
            .map(Emitter::id)
            .collect::<Vec<_>>();
        for emitter in orphans {
            self.remove_emitter(emitter)?;
        }
        Ok(())
    }

    pub fn set_frame_position(&mut self, frame: FrameId, position: Vec3) -> Result<(), Error> {
        self.attachments.set_frame_position(frame, position)
    }

    /// The speaker the given frame is currently attached to, if any.
    pub fn frame_attachment(&self, frame: FrameId) -> Option<SpeakerId> {
        self.attachments.frame(frame).and_then(|frame| frame.speaker)
    }

    /// Validate the emitter config and add a new emitter.
    pub fn add_emitter(&mut self, config: EmitterConfig) -> Result<EmitterId, Error> {
        if self.attachments.frame(config.frame).is_none() {
            return Err(Error::FrameNotFound(config.frame));
        }
        let clip = self
            .clips
            .get(&config.clip)
            .cloned()
            .ok_or(Error::ClipNotFound(config.clip))?;
        let id = self.next_emitter_id;
        let emitter = Emitter::new(id, &config, clip, &self.config)?;
        self.next_emitter_id += 1;
        self.emitter_indices.insert(id, self.emitters.len());
        self.emitters.push(emitter);
        log::info!(
            "Added {} emitter #{id} at frame #{}",
            config.emitter_type,
            config.frame
        );
        Ok(id)
    }

    /// Remove an emitter. Grains it already handed over to speakers play to their end.
    pub fn remove_emitter(&mut self, emitter: EmitterId) -> Result<(), Error> {
        let index = self
            .emitter_indices
            .remove(&emitter)
            .ok_or(Error::EmitterNotFound(emitter))?;
        self.emitters.swap_remove(index);
        if let Some(moved) = self.emitters.get(index) {
            self.emitter_indices.insert(moved.id(), index);
        }
        Ok(())
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    /// Set an interaction input of an emitter for the next tick.
    pub fn set_emitter_input(
        &mut self,
        emitter: EmitterId,
        input: InteractionInput,
        value: f32,
    ) -> Result<(), Error> {
        let index = self
            .emitter_indices
            .get(&emitter)
            .ok_or(Error::EmitterNotFound(emitter))?;
        self.emitters[*index].set_input(input, value);
        Ok(())
    }

    /// A handle to push collisions from other threads.
    pub fn collision_sender(&self) -> CollisionSender {
        CollisionSender {
            queue: Arc::clone(&self.collisions),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Queue a collision for the next tick. Returns false when the event got dropped.
    pub fn push_collision(&self, event: CollisionEvent) -> bool {
        self.collision_sender().send(event)
    }

    /// Poses of all speakers in the pool, for visualization.
    pub fn speaker_poses(&self) -> Vec<SpeakerPose> {
        self.attachments
            .speakers()
            .iter()
            .map(|speaker| speaker.pose())
            .collect()
    }

    /// Snapshot of the grain counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run a simulation tick of the given duration.
    pub fn tick(&mut self, delta_time: Duration) {
        let delta_time = delta_time.as_secs_f32();

        for (speaker, queues) in self.pool.speakers().iter().enumerate() {
            self.attachments.set_grain_load(speaker, queues.grain_load());
        }

        self.attachments.update(&self.listener, delta_time);
        self.publish_speaker_gains();
        self.apply_collisions();

        for emitter in &mut self.emitters {
            let (speaker, distance) = match self.attachments.frame(emitter.frame()) {
                Some(frame) => (
                    frame.speaker,
                    frame.position.distance(self.listener.position),
                ),
                None => (None, f32::INFINITY),
            };
            emitter.set_speaker(speaker);
            emitter.set_input(InteractionInput::DistanceToListener, distance);
        }

        let context = ScheduleContext::new(&self.config, self.clock.now());
        let emitter_count = self.emitters.len();
        match &mut self.thread_pool {
            Some(pool) if pool.should_use_concurrent_processing(emitter_count) => {
                pool.process(&mut self.emitters, &context, delta_time);
            }
            _ => {
                for emitter in &mut self.emitters {
                    emitter.process(&context, delta_time, &mut self.renderer);
                }
            }
        }
    }

    fn publish_speaker_gains(&self) {
        for speaker in self.attachments.speakers() {
            if speaker.state == SpeakerState::Pooled {
                continue;
            }
            if let Some(queues) = self.pool.get(speaker.id) {
                let (left, right) = speaker_gains(&self.listener, speaker.position);
                queues.set_gains(left, right);
            }
        }
    }

    fn apply_collisions(&mut self) {
        while let Some(event) = self.collisions.pop() {
            match self.emitter_indices.get(&event.emitter) {
                Some(index) => self.emitters[*index].push_collision(event.force, event.speed),
                None => log::warn!(
                    "Ignoring collision event for unknown emitter #{}",
                    event.emitter
                ),
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Stereo gains of a speaker: equal power panning from its lateral offset to the listener and
/// a linear roll-off over the listener's radius.
fn speaker_gains(listener: &Listener, position: Vec3) -> (f32, f32) {
    let offset = position - listener.position;
    let distance = offset.length();
    let roll_off = if listener.radius > 0.0 {
        clamp01(1.0 - distance / listener.radius)
    } else {
        0.0
    };
    let pan = if distance > f32::EPSILON {
        offset.x / distance
    } else {
        0.0
    };
    let (left, right) = panning_factors(pan);
    (left * roll_off, right * roll_off)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{modulation::ModulationParameter, EmitterParameters, GrainDiscardReason};

    fn test_config() -> EngineConfig {
        EngineConfig::default()
            .sample_rate(1000)
            .speakers_allocated(4)
            .grains_per_speaker(16)
            .worker_thread_count(1)
            .realtime_workers(false)
    }

    fn clip() -> Vec<f32> {
        (0..1000).map(|i| (i as f32 * 0.1).sin() * 0.5).collect()
    }

    #[test]
    fn gains() {
        let listener = Listener::new(Vec3::ZERO, 10.0);
        let (left, right) = speaker_gains(&listener, Vec3::new(5.0, 0.0, 0.0));
        assert!(left.abs() < 1e-6);
        assert!((right - 0.5).abs() < 1e-6);
        let (left, right) = speaker_gains(&listener, Vec3::new(0.0, 0.0, -5.0));
        assert!((left - right).abs() < 1e-6);
        assert_eq!(speaker_gains(&listener, Vec3::new(0.0, 20.0, 0.0)), (0.0, 0.0));
        assert_eq!(
            speaker_gains(&Listener::new(Vec3::ZERO, 0.0), Vec3::ZERO),
            (0.0, 0.0)
        );
    }

    #[test]
    fn configuration_errors() -> Result<(), Error> {
        assert!(Engine::new(test_config().speakers_allocated(0)).is_err());

        let (mut engine, _mixer) = Engine::new(test_config())?;
        assert!(matches!(
            engine.add_clip(Vec::<f32>::new()),
            Err(Error::ParameterError(_))
        ));
        let clip = engine.add_clip(clip())?;
        let frame = engine.add_frame(Vec3::ZERO);

        assert!(matches!(
            engine.add_emitter(EmitterConfig::continuous(frame + 1, clip)),
            Err(Error::FrameNotFound(_))
        ));
        assert!(matches!(
            engine.add_emitter(EmitterConfig::continuous(frame, clip + 1)),
            Err(Error::ClipNotFound(_))
        ));
        let mut burst_without_length = EmitterConfig::burst(frame, clip);
        burst_without_length.parameters.length = None;
        assert!(matches!(
            engine.add_emitter(burst_without_length),
            Err(Error::ConfigurationError(_))
        ));
        assert_eq!(engine.emitter_count(), 0);

        let emitter = engine.add_emitter(EmitterConfig::continuous(frame, clip))?;
        assert!(engine
            .set_emitter_input(emitter, InteractionInput::Speed, 1.0)
            .is_ok());
        assert!(matches!(
            engine.set_emitter_input(emitter + 1, InteractionInput::Speed, 1.0),
            Err(Error::EmitterNotFound(_))
        ));
        assert!(matches!(
            engine.remove_clip(clip + 1),
            Err(Error::ClipNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn frame_removal_removes_emitters() -> Result<(), Error> {
        let (mut engine, _mixer) = Engine::new(test_config())?;
        let clip = engine.add_clip(clip())?;
        let frame_a = engine.add_frame(Vec3::ZERO);
        let frame_b = engine.add_frame(Vec3::X);
        let a = engine.add_emitter(EmitterConfig::continuous(frame_a, clip))?;
        let b = engine.add_emitter(EmitterConfig::continuous(frame_b, clip))?;
        let c = engine.add_emitter(EmitterConfig::burst(frame_a, clip))?;
        assert_eq!(engine.emitter_count(), 3);

        engine.remove_frame(frame_a)?;
        assert_eq!(engine.emitter_count(), 1);
        assert!(engine.remove_emitter(a).is_err());
        assert!(engine.remove_emitter(c).is_err());
        // clips stay alive for existing emitters
        engine.remove_clip(clip)?;
        engine.tick(Duration::from_millis(10));
        engine.remove_emitter(b)?;
        assert_eq!(engine.emitter_count(), 0);
        assert!(matches!(
            engine.remove_frame(frame_a),
            Err(Error::FrameNotFound(_))
        ));
        Ok(())
    }

    fn play_continuous_emitter(config: EngineConfig) -> Result<(), Error> {
        let (mut engine, mut mixer) = Engine::new(config)?;
        engine.set_listener(Listener::new(Vec3::ZERO, 30.0));
        let clip = engine.add_clip(clip())?;
        let frames = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.1)]
            .map(|position| engine.add_frame(position));
        for frame in frames {
            engine.add_emitter(EmitterConfig::continuous(frame, clip).seed(frame as u64))?;
        }

        let mut output = vec![0.0; 20];
        let mut right_energy = 0.0;
        let mut left_energy = 0.0;
        for _ in 0..20 {
            engine.tick(Duration::from_millis(10));
            mixer.process(&mut output);
            for frame in output.chunks_exact(2) {
                left_energy += frame[0].abs();
                right_energy += frame[1].abs();
            }
        }
        assert_eq!(mixer.clock().now(), 200);

        // both frames share a single speaker at the listener's right side
        let speaker = engine.frame_attachment(frames[0]);
        assert!(speaker.is_some());
        assert_eq!(engine.frame_attachment(frames[1]), speaker);
        let poses = engine.speaker_poses();
        assert_eq!(poses.len(), 4);
        assert_eq!(
            poses
                .iter()
                .filter(|pose| pose.state == SpeakerState::Active)
                .count(),
            1
        );
        assert!(right_energy > 0.0);
        assert!(left_energy < right_energy * 0.01);

        let stats = engine.stats();
        assert!(stats.grains_scheduled > 0);
        assert!(stats.grains_played > 0);
        assert_eq!(stats.discarded(GrainDiscardReason::NoSpeaker), 0);
        assert_eq!(stats.discarded(GrainDiscardReason::PoolFull), 0);
        Ok(())
    }

    #[test]
    fn continuous_emitters_play_inline() -> Result<(), Error> {
        play_continuous_emitter(test_config())
    }

    #[test]
    fn continuous_emitters_play_in_workers() -> Result<(), Error> {
        play_continuous_emitter(test_config().worker_thread_count(2))
    }

    #[test]
    fn out_of_range_frames_stay_silent() -> Result<(), Error> {
        let (mut engine, mut mixer) = Engine::new(test_config())?;
        engine.set_listener(Listener::new(Vec3::ZERO, 10.0));
        let clip = engine.add_clip(clip())?;
        let frame = engine.add_frame(Vec3::new(20.0, 0.0, 0.0));
        engine.add_emitter(EmitterConfig::continuous(frame, clip))?;

        let mut output = vec![0.0; 20];
        for _ in 0..5 {
            engine.tick(Duration::from_millis(10));
            mixer.process(&mut output);
            assert!(output.iter().all(|sample| *sample == 0.0));
        }
        assert_eq!(engine.frame_attachment(frame), None);
        let stats = engine.stats();
        assert_eq!(stats.grains_rendered, 0);
        assert_eq!(
            stats.discarded(GrainDiscardReason::NoSpeaker),
            stats.grains_scheduled
        );

        // moving into range attaches the frame
        engine.set_frame_position(frame, Vec3::new(5.0, 0.0, 0.0))?;
        engine.tick(Duration::from_millis(10));
        assert!(engine.frame_attachment(frame).is_some());
        Ok(())
    }

    #[test]
    fn collisions_trigger_bursts() -> Result<(), Error> {
        let (mut engine, mut mixer) =
            Engine::new(test_config().collision_queue_capacity(2))?;
        let clip = engine.add_clip(clip())?;
        let frame = engine.add_frame(Vec3::new(0.0, 0.0, 2.0));
        let emitter = engine.add_emitter(
            EmitterConfig::burst(frame, clip).seed(7).parameters(
                EmitterParameters::burst()
                    .duration(ModulationParameter::new(5.0, 1000.0, 20.0))
                    .length(ModulationParameter::new(10.0, 5000.0, 100.0)),
            ),
        )?;

        let sender = engine.collision_sender();
        assert!(sender.send(CollisionEvent::new(emitter, 1.0, 2.0)));
        // unknown emitters get ignored
        assert!(sender.send(CollisionEvent::new(emitter + 1, 1.0, 2.0)));
        // queue full
        assert!(!engine.push_collision(CollisionEvent::new(emitter, 1.0, 2.0)));

        engine.tick(Duration::from_millis(10));
        let stats = engine.stats();
        assert_eq!(stats.bursts_triggered, 1);
        assert_eq!(stats.collisions_dropped, 1);
        assert!(stats.grains_scheduled > 0);

        let mut output = vec![0.0; 400];
        mixer.process(&mut output);
        assert!(output.iter().any(|sample| *sample != 0.0));

        // no further collisions, no further bursts
        engine.tick(Duration::from_millis(10));
        assert_eq!(engine.stats().bursts_triggered, 1);
        Ok(())
    }
}
