use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    emitter::{Emitter, EmitterRenderer},
    scheduler::ScheduleContext,
    utils::{assert_no_alloc, permit_alloc},
    EngineConfig, Error,
};

// -------------------------------------------------------------------------------------------------

/// A bin for collecting emitters assigned to a worker during bin-packing.
#[derive(Debug, Clone)]
struct WorkerTaskBin {
    pub total_weight: usize,
    pub emitter_indices: Vec<usize>,
}

impl WorkerTaskBin {
    fn new(capacity_hint: usize) -> Self {
        Self {
            total_weight: 0,
            emitter_indices: Vec::with_capacity(capacity_hint),
        }
    }

    fn clear(&mut self) {
        self.total_weight = 0;
        self.emitter_indices.clear();
    }
}

// -------------------------------------------------------------------------------------------------

/// Weight and index of a single emitter within a worker task batch.
#[derive(Debug, Copy, Clone)]
struct WorkerTaskEmitterWeight {
    index: usize,
    weight: usize,
}

// -------------------------------------------------------------------------------------------------

/// Creates weighted batches of emitter tasks for the thread pool's workers.
#[derive(Debug, Clone)]
struct WorkerTaskBatcher {
    /// Emitter index and weight for bin sorting
    emitters: Vec<WorkerTaskEmitterWeight>,
    /// One bin per worker thread
    bins: Vec<WorkerTaskBin>,
}

impl WorkerTaskBatcher {
    pub fn new(thread_count: usize, max_expected_emitters: usize) -> Self {
        let bin_capacity = (max_expected_emitters / thread_count).max(1) + 8;
        Self {
            emitters: Vec::with_capacity(max_expected_emitters),
            bins: (0..thread_count)
                .map(|_| WorkerTaskBin::new(bin_capacity))
                .collect(),
        }
    }

    #[inline(always)]
    pub fn bins(&self) -> &[WorkerTaskBin] {
        &self.bins
    }

    pub fn clear(&mut self) {
        self.emitters.clear();
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    /// Greedy bin-packing: distribute emitters across workers, heaviest first, always into the
    /// bin with the lowest total weight.
    pub fn update(&mut self, emitters: &[Emitter]) {
        self.clear();
        if emitters.is_empty() {
            return;
        }
        self.emitters
            .extend(emitters.iter().enumerate().map(|(index, emitter)| {
                WorkerTaskEmitterWeight {
                    index,
                    weight: emitter.weight(),
                }
            }));
        self.emitters.sort_by(|a, b| b.weight.cmp(&a.weight));

        for emitter_weight in &self.emitters {
            if let Some(min_bin) = self.bins.iter_mut().min_by_key(|bin| bin.total_weight) {
                min_bin.total_weight += emitter_weight.weight;
                min_bin.emitter_indices.push(emitter_weight.index);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Command sent from the engine to worker threads.
#[derive(Debug, Copy, Clone)]
enum WorkerCommand {
    Process,
    Shutdown,
}

/// Sent from a worker thread to the engine to signal completion.
type WorkerCompletion = Result<(), Box<dyn Any + Send + 'static>>;

// -------------------------------------------------------------------------------------------------

/// A batch of emitters, processed by a single worker.
#[derive(Debug)]
struct WorkerProcessingTask {
    emitters: Vec<NonNull<Emitter>>,
    context: ScheduleContext,
    delta_time: f32,
}

// SAFETY: The engine creates the emitter pointers from a &mut slice, hands out every emitter to
// exactly one worker, and waits for all workers to complete before touching the emitters again.
unsafe impl Send for WorkerProcessingTask {}

// -------------------------------------------------------------------------------------------------

/// Per-worker state that only the owning worker and the engine access.
#[derive(Debug)]
struct WorkerState {
    /// Current work package
    task: Mutex<WorkerProcessingTask>,
    /// Channel to send commands to this worker
    work_sender: Sender<WorkerCommand>,
    /// Channel to receive completion from this worker
    completion_receiver: Receiver<WorkerCompletion>,
}

impl WorkerState {
    fn new(
        capacity_hint: usize,
        context: ScheduleContext,
    ) -> (Self, Receiver<WorkerCommand>, Sender<WorkerCompletion>) {
        let (work_sender, work_receiver) = crossbeam_channel::bounded(0);
        let (completion_sender, completion_receiver) = crossbeam_channel::bounded(0);
        let state = Self {
            task: Mutex::new(WorkerProcessingTask {
                emitters: Vec::with_capacity(capacity_hint),
                context,
                delta_time: 0.0,
            }),
            work_sender,
            completion_receiver,
        };
        (state, work_receiver, completion_sender)
    }

    #[inline(always)]
    fn task(&self) -> MutexGuard<'_, WorkerProcessingTask> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_task<I>(&self, emitters: I, context: &ScheduleContext, delta_time: f32)
    where
        I: IntoIterator<Item = NonNull<Emitter>>,
    {
        let mut task = self.task();
        task.emitters.clear();
        task.emitters.extend(emitters);
        task.context = *context;
        task.delta_time = delta_time;
    }
}

// -------------------------------------------------------------------------------------------------

/// Thread pool for the emitter stage of an engine tick.
///
/// Workers get spawned once and optionally promoted to real-time priority. Each worker owns its
/// own grain render buffers. Processing a tick is a blocking call: it returns when all workers
/// finished their batch.
pub(crate) struct EmitterThreadPool {
    /// Per-worker state (no contention between workers, includes channels)
    worker_states: Vec<Arc<WorkerState>>,
    /// Worker thread handles
    worker_threads: Vec<thread::JoinHandle<()>>,
    /// Pre-allocated scratch buffers for batching
    task_batcher: WorkerTaskBatcher,
    /// Workers which received a task in the current tick
    dispatched: Vec<bool>,
}

impl EmitterThreadPool {
    /// Number of emitters we pre-allocate scratch space for.
    pub const MAX_EMITTERS_HINT: usize = 256;

    /// Spawn `config.worker_thread_count` worker threads. `create_renderer` creates each
    /// worker's render state.
    pub fn new<F>(config: &EngineConfig, mut create_renderer: F) -> Result<Self, Error>
    where
        F: FnMut() -> EmitterRenderer,
    {
        let thread_count = config.worker_thread_count.max(1);
        let worker_capacity = (Self::MAX_EMITTERS_HINT / thread_count).max(1) + 16;
        let sample_rate = config.sample_rate;
        let realtime = config.realtime_workers;

        let mut worker_states = Vec::with_capacity(thread_count);
        let mut worker_threads = Vec::with_capacity(thread_count);
        for worker_id in 0..thread_count {
            let (state, work_receiver, completion_sender) =
                WorkerState::new(worker_capacity, ScheduleContext::new(config, 0));
            let worker_state = Arc::new(state);
            worker_states.push(Arc::clone(&worker_state));

            let renderer = create_renderer();
            worker_threads.push(
                thread::Builder::new()
                    .name(format!("grainbrain-emitter-worker-{worker_id}"))
                    .spawn(move || {
                        let error_sender = completion_sender.clone();
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || {
                            Self::run_worker_thread(
                                sample_rate,
                                realtime,
                                worker_id,
                                worker_state,
                                work_receiver,
                                completion_sender,
                                renderer,
                            )
                        })) {
                            log::error!(
                                "Ouch. Emitter worker thread #{worker_id} panicked: {}",
                                panic_message::panic_message(&payload)
                            );
                            if error_sender.send(Err(payload)).is_err() {
                                log::error!("Failed to forward worker #{worker_id} panic");
                            }
                        }
                    })?,
            );
        }
        log::info!("Spawned {thread_count} emitter worker threads");

        Ok(Self {
            worker_states,
            worker_threads,
            task_batcher: WorkerTaskBatcher::new(thread_count, Self::MAX_EMITTERS_HINT),
            dispatched: vec![false; thread_count],
        })
    }

    /// Check if the thread pool should be used for the given number of emitters.
    pub fn should_use_concurrent_processing(&self, emitter_count: usize) -> bool {
        self.worker_threads.len() >= 2 && emitter_count >= 2
    }

    /// Process all emitters in the pool's workers and wait until all of them finished.
    ///
    /// Panics of workers get re-raised on the calling thread after all other workers completed.
    pub fn process(
        &mut self,
        emitters: &mut [Emitter],
        context: &ScheduleContext,
        delta_time: f32,
    ) {
        debug_assert!(self.should_use_concurrent_processing(emitters.len()));

        self.task_batcher.update(emitters);

        let emitters_ptr = emitters.as_mut_ptr();
        for (worker_id, worker_state) in self.worker_states.iter().enumerate() {
            self.dispatched[worker_id] = false;
            let Some(bin) = self.task_batcher.bins().get(worker_id) else {
                continue;
            };
            if bin.emitter_indices.is_empty() {
                continue;
            }
            // SAFETY: indices are unique and in bounds of the emitter slice
            let task_emitters = bin
                .emitter_indices
                .iter()
                .filter_map(|&index| NonNull::new(unsafe { emitters_ptr.add(index) }));
            worker_state.set_task(task_emitters, context, delta_time);
            if worker_state.work_sender.send(WorkerCommand::Process).is_err() {
                log::error!("Emitter worker thread #{worker_id} is gone. Skipping its emitters.");
                continue;
            }
            self.dispatched[worker_id] = true;
        }

        let mut panic_payload = None;
        for (worker_id, worker_state) in self.worker_states.iter().enumerate() {
            if !self.dispatched[worker_id] {
                continue;
            }
            // NB: Crossbeam allocs thread local variables here once.
            let result = permit_alloc(|| worker_state.completion_receiver.recv());
            match result {
                Ok(Ok(())) => (),
                Ok(Err(payload)) => {
                    panic_payload.get_or_insert(payload);
                }
                Err(_) => {
                    log::error!("Emitter worker thread #{worker_id} got disconnected");
                }
            }
        }
        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
    }

    fn run_worker_thread(
        sample_rate: u32,
        realtime: bool,
        worker_id: usize,
        worker_state: Arc<WorkerState>,
        work_receiver: Receiver<WorkerCommand>,
        completion_sender: Sender<WorkerCompletion>,
        mut renderer: EmitterRenderer,
    ) {
        if realtime {
            if let Err(err) = audio_thread_priority::promote_current_thread_to_real_time(
                512, // tick size estimate
                sample_rate,
            ) {
                log::warn!(
                    "Failed to promote emitter worker #{worker_id} to real-time priority: {err}"
                );
            }
        }

        loop {
            match work_receiver.recv() {
                Ok(WorkerCommand::Process) => {
                    assert_no_alloc(|| {
                        let task = worker_state.task();
                        for emitter_ptr in &task.emitters {
                            // SAFETY: see WorkerProcessingTask. The engine waits for our
                            // completion before accessing the emitter again.
                            let emitter = unsafe { &mut *emitter_ptr.as_ptr() };
                            emitter.process(&task.context, task.delta_time, &mut renderer);
                        }
                    });
                    if completion_sender.send(WorkerCompletion::Ok(())).is_err() {
                        log::warn!("Emitter worker thread #{worker_id} got disconnected.");
                        break;
                    }
                }
                Ok(WorkerCommand::Shutdown) => {
                    log::info!("Emitter worker thread #{worker_id} is shutting down...");
                    break;
                }
                Err(_) => {
                    log::warn!("Emitter worker thread #{worker_id} got disconnected.");
                    break;
                }
            }
        }
    }
}

impl Drop for EmitterThreadPool {
    fn drop(&mut self) {
        for worker_state in &self.worker_states {
            let _ = worker_state.work_sender.send(WorkerCommand::Shutdown);
        }
        while let Some(worker) = self.worker_threads.pop() {
            if let Err(payload) = worker.join() {
                log::error!(
                    "Emitter worker thread panicked: {}",
                    panic_message::panic_message(&payload)
                );
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emitter::{EmitterConfig, EmitterParameters},
        modulation::ModulationParameter,
        stats::EngineStats,
        utils::time::AudioClock,
        voice::SpeakerGrainPool,
    };

    #[test]
    fn bin_packing() -> Result<(), Error> {
        let config = EngineConfig::default().sample_rate(1000);
        let clip: Arc<[f32]> = Arc::from(vec![0.5; 100]);
        let emitters = (0..5)
            .map(|id| {
                let emitter_config = EmitterConfig::continuous(0, 0).seed(id as u64);
                Emitter::new(id, &emitter_config, Arc::clone(&clip), &config)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut batcher = WorkerTaskBatcher::new(2, 16);
        batcher.update(&emitters);
        let bins = batcher.bins();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].emitter_indices.len() + bins[1].emitter_indices.len(), 5);
        assert!(bins[0].total_weight.abs_diff(bins[1].total_weight) <= 2);
        Ok(())
    }

    #[test]
    fn parallel_processing() -> Result<(), Error> {
        let config = EngineConfig::default()
            .sample_rate(1000)
            .worker_thread_count(3)
            .realtime_workers(false);
        let pool = SpeakerGrainPool::new(1, 256, config.max_grain_samples());
        let stats = EngineStats::new();
        let clock = AudioClock::new();
        let mut thread_pool = EmitterThreadPool::new(&config, || {
            EmitterRenderer::new(
                pool.clone(),
                clock.clone(),
                Arc::clone(&stats),
                config.max_grain_samples(),
            )
        })?;

        let clip: Arc<[f32]> = Arc::from(vec![0.5; 100]);
        let parameters = EmitterParameters::continuous()
            .duration(ModulationParameter::new(5.0, 1000.0, 10.0))
            .density(ModulationParameter::new(0.1, 32.0, 1.0));
        let mut emitters = (0..8)
            .map(|id| {
                let emitter_config = EmitterConfig::continuous(0, 0)
                    .seed(id as u64)
                    .parameters(parameters.clone());
                let mut emitter = Emitter::new(id, &emitter_config, Arc::clone(&clip), &config)?;
                emitter.set_speaker(Some(0));
                Ok::<_, Error>(emitter)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        assert!(thread_pool.should_use_concurrent_processing(emitters.len()));

        // 22ms lookahead with 10ms grains: 3 grains per emitter
        let context = ScheduleContext::new(&config, 0);
        thread_pool.process(&mut emitters, &context, 0.02);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.grains_scheduled, 24);
        assert_eq!(snapshot.grains_rendered, 24);
        assert_eq!(snapshot.grains_discarded(), 0);
        Ok(())
    }
}
