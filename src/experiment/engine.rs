//! Session orchestrator.
//!
//! The engine runs a whole session on a dedicated worker thread that owns
//! the hardware bundle for the session lifetime (display and audio contexts
//! are bound to their creating thread). Controllers interact through an
//! [`EngineHandle`] and the [`EngineEvent`] channel; the only things that
//! cross the thread boundary are flags, gates and channel messages.
//!
//! The worker is the sole error boundary: any `EngineError` escaping the
//! session loop moves the engine to [`ExperimentState::Error`] after the
//! same unconditional hardware teardown every other exit path gets.

use crate::config::ExperimentConfig;
use crate::data::{EventLogger, SessionMonitor, SessionSummary, TrialLog, TrialStatus};
use crate::error::{EngineError, Result};
use crate::experiment::protocol::{TrialContext, TrialObserver, TrialOutcome, TrialProtocol};
use crate::experiment::state::{EngineEvent, ExperimentState, TrialPhase};
use crate::hardware::{Hardware, HardwareFactory};
use crate::session::{SessionLayout, SessionQueue};
use crate::sync::{AtomicFlag, Gate};
use crate::timing::FrameTable;
use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// State shared between the controller side and the worker.
struct Shared {
    state: Mutex<ExperimentState>,
    /// Permanent session abort. Never cleared once set.
    abort: AtomicFlag,
    /// Interrupts the in-progress trial; cleared by the worker on resume.
    trial_interrupt: AtomicFlag,
    /// Closed by `pause`, opened by `resume` and `request_abort`.
    run_gate: Gate,
    /// One-shot per-turn confirmation; closed by the worker before each turn.
    confirm_gate: Gate,
    /// Redo the current turn instead of advancing past it.
    retry: AtomicFlag,
    tx: Sender<EngineEvent>,
}

impl Shared {
    fn set_state(&self, state: ExperimentState) {
        let mut current = self.state.lock();
        if *current != state {
            *current = state;
            drop(current);
            let _ = self.tx.send(EngineEvent::StateChanged(state));
        }
    }

    fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Cloneable cross-thread control surface.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn state(&self) -> ExperimentState {
        *self.shared.state.lock()
    }

    /// Interrupt the current trial and hold before the next one. The
    /// in-progress recording will be discarded and the same stimulus retried
    /// after [`Self::resume`].
    pub fn pause(&self) {
        self.shared.run_gate.close();
        self.shared.trial_interrupt.set();
    }

    pub fn resume(&self) {
        self.shared.run_gate.open();
    }

    /// Allow the next queue item to start. One confirmation per turn.
    pub fn confirm_next(&self) {
        self.shared.confirm_gate.open();
    }

    /// Permanently end the session. Opens both gates so a paused or waiting
    /// worker unblocks into its abort checks; safe to race pause/resume.
    pub fn request_abort(&self) {
        self.shared.abort.set();
        self.shared.trial_interrupt.set();
        self.shared.run_gate.open();
        self.shared.confirm_gate.open();
    }

    /// After the current turn finishes, clear its completed mark and run the
    /// same turn again instead of advancing.
    pub fn retry_current(&self) {
        self.shared.retry.set();
    }
}

/// Everything the worker owns for one session.
struct WorkerCtx {
    shared: Arc<Shared>,
    factory: Arc<dyn HardwareFactory>,
    config: ExperimentConfig,
    subjects: Vec<String>,
    screen_index: usize,
    queue: SessionQueue,
    layout: SessionLayout,
    events: Arc<EventLogger>,
    trial_log: TrialLog,
    monitor: SessionMonitor,
}

/// Resources built at setup, handed to the worker at start.
struct SessionResources {
    subjects: Vec<String>,
    screen_index: usize,
    queue: SessionQueue,
    layout: SessionLayout,
    events: Arc<EventLogger>,
    trial_log: TrialLog,
    monitor: SessionMonitor,
}

enum SessionEnd {
    Completed,
    Aborted,
}

enum TurnEnd {
    Completed,
    Aborted,
}

/// Owns the worker thread and the session resources between setup and start.
pub struct ExperimentEngine {
    config: ExperimentConfig,
    factory: Arc<dyn HardwareFactory>,
    shared: Arc<Shared>,
    events_rx: Receiver<EngineEvent>,
    resources: Option<SessionResources>,
    session_dir: Option<PathBuf>,
    worker: Option<JoinHandle<()>>,
}

impl ExperimentEngine {
    pub fn new(config: ExperimentConfig, factory: Arc<dyn HardwareFactory>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(ExperimentState::Idle),
            abort: AtomicFlag::new(),
            trial_interrupt: AtomicFlag::new(),
            run_gate: Gate::new(true),
            confirm_gate: Gate::new(false),
            retry: AtomicFlag::new(),
            tx,
        });
        Self {
            config,
            factory,
            shared,
            events_rx: rx,
            resources: None,
            session_dir: None,
            worker: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> ExperimentState {
        *self.shared.state.lock()
    }

    /// Receiver for the engine event stream. Cloneable; events are consumed
    /// by whichever receiver gets there first, so keep one consumer.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Directory of the session created by the last `setup`.
    pub fn session_dir(&self) -> Option<&PathBuf> {
        self.session_dir.as_ref()
    }

    /// Validate the config and build the session on disk: directory tree,
    /// loggers and queue. No hardware is touched here.
    pub fn setup(&mut self, subjects: Vec<String>, screen_index: usize) -> Result<()> {
        if !matches!(self.state(), ExperimentState::Idle) && !self.state().is_terminal() {
            return Err(EngineError::Busy("session already in progress".into()));
        }
        if subjects.is_empty() {
            return Err(EngineError::Config("at least one subject is required".into()));
        }
        self.config.validate()?;
        let stimuli = self.config.stimuli()?;
        let queue = SessionQueue::build(
            &subjects,
            self.config.repetitions,
            &stimuli,
            self.config.shape_reps_per_subsession,
        )?;
        fs::create_dir_all(&self.config.output_base_dir)?;
        let layout = SessionLayout::create(&self.config.output_base_dir, &subjects)?;
        let events = Arc::new(EventLogger::create(&layout.event_log_path())?);
        let trial_log = TrialLog::create(&layout.trial_log_path())?;
        let monitor = SessionMonitor::new(&self.config.output_base_dir);
        info!(
            subjects = subjects.len(),
            queue_len = queue.len(),
            dir = %layout.session_dir().display(),
            "session prepared"
        );
        self.session_dir = Some(layout.session_dir().to_path_buf());
        self.resources = Some(SessionResources {
            subjects,
            screen_index,
            queue,
            layout,
            events,
            trial_log,
            monitor,
        });
        Ok(())
    }

    /// Spawn the worker thread. Returns immediately; follow progress on the
    /// event stream and join with [`Self::join`].
    pub fn start(&mut self) -> Result<()> {
        let resources = self.resources.take().ok_or(EngineError::NotSetUp)?;
        self.shared.abort.clear();
        self.shared.trial_interrupt.clear();
        self.shared.retry.clear();
        self.shared.run_gate.open();
        self.shared.confirm_gate.close();
        self.shared.set_state(ExperimentState::Running);

        let ctx = WorkerCtx {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
            subjects: resources.subjects,
            screen_index: resources.screen_index,
            queue: resources.queue,
            layout: resources.layout,
            events: resources.events,
            trial_log: resources.trial_log,
            monitor: resources.monitor,
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("experiment-worker".into())
                .spawn(move || worker_main(ctx))
                .map_err(EngineError::Io)?,
        );
        Ok(())
    }

    /// Block until the worker exits and return the terminal state.
    pub fn join(&mut self) -> ExperimentState {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("experiment worker panicked");
                self.shared.set_state(ExperimentState::Error);
            }
        }
        self.state()
    }
}

fn worker_main(mut ctx: WorkerCtx) {
    let started = Local::now();
    let result = run_session(&mut ctx);
    let ended = Local::now();

    let (state, event_name) = match &result {
        Ok(SessionEnd::Completed) => (ExperimentState::Completed, "SESSION_COMPLETED"),
        Ok(SessionEnd::Aborted) => (ExperimentState::Aborted, "SESSION_ABORTED"),
        Err(_) => (ExperimentState::Error, "SESSION_ERROR"),
    };

    match &result {
        Ok(_) => {
            ctx.events.log_session(event_name);
            let summary = SessionSummary {
                started,
                ended,
                status: state.to_string(),
                participants: ctx.subjects.clone(),
                stimuli: ctx
                    .config
                    .stimuli()
                    .map(|set| set.iter().map(|s| s.display_name()).collect())
                    .unwrap_or_default(),
                repetitions: ctx.config.repetitions,
                shape_reps_per_subsession: ctx.config.shape_reps_per_subsession,
                camera_summary: ctx.config.camera.summary(),
                session_folder: ctx.layout.session_dir().to_path_buf(),
            };
            if let Err(e) = ctx.monitor.log_session(&summary) {
                warn!(error = %e, "failed to append session overview row");
            }
        }
        Err(e) => {
            error!(error = %e, "session failed");
            ctx.events.log_session_detail(event_name, &e.to_string());
            ctx.shared.send(EngineEvent::ErrorOccurred(e.to_string()));
        }
    }

    ctx.shared.set_state(state);
    ctx.shared.send(EngineEvent::SessionFinished);
}

/// Create the hardware on this thread, run the session, then tear down on
/// every path: an open recording is closed and the display released whether
/// the loop completed, aborted or failed.
fn run_session(ctx: &mut WorkerCtx) -> Result<SessionEnd> {
    let mut hardware = ctx.factory.create(ctx.screen_index)?;
    let result = session_loop(ctx, &mut hardware);
    if hardware.camera.is_recording() {
        if let Err(e) = hardware.camera.stop_recording() {
            warn!(error = %e, "closing leftover recording during teardown failed");
        }
    }
    hardware.display.close();
    result
}

fn session_loop(ctx: &mut WorkerCtx, hardware: &mut Hardware) -> Result<SessionEnd> {
    // Frame table is frozen once per session, from the measured rate.
    let refresh_hz = hardware.display.measure_refresh_rate()?;
    let frames = FrameTable::derive(&ctx.config.timing, refresh_hz);
    info!(
        refresh_hz,
        training_shape = frames.training_shape,
        training_blank = frames.training_blank,
        measurement_beep = frames.measurement_beep,
        measurement_silence = frames.measurement_silence,
        "frame table frozen"
    );

    if let Some(item) = ctx.queue.items().first() {
        let mut prepared = std::collections::HashSet::new();
        for stimulus in &item.stimuli {
            if prepared.insert(stimulus.clone()) {
                hardware.display.prepare_stimulus(stimulus)?;
            }
        }
    }
    // Tone buffers are generated at exactly frames * frame_duration, so
    // audio length can never drift from the swap count.
    hardware.audio.prepare_tone(
        crate::hardware::Tone::Training,
        frames.tone_duration(frames.training_shape),
    )?;
    hardware.audio.prepare_tone(
        crate::hardware::Tone::Measurement,
        frames.tone_duration(frames.measurement_beep),
    )?;

    ctx.events.start_clock();
    ctx.events.log_session("SESSION_START");

    loop {
        if ctx.shared.abort.is_set() {
            break;
        }
        if !ctx.shared.run_gate.is_open() {
            ctx.shared.set_state(ExperimentState::Paused);
            ctx.shared.run_gate.wait();
            if ctx.shared.abort.is_set() {
                break;
            }
            ctx.shared.trial_interrupt.clear();
        }
        if ctx.queue.is_done() {
            break;
        }

        // Close before announcing, so a confirmation sent in response to the
        // announcement can never be swallowed by the close. An abort that
        // opened the gate concurrently set the flag first, so re-check it.
        ctx.shared.confirm_gate.close();
        if ctx.shared.abort.is_set() {
            break;
        }
        ctx.shared.set_state(ExperimentState::WaitingConfirm);
        if let Some(item) = ctx.queue.current() {
            ctx.shared.send(EngineEvent::ProgressText(format!(
                "Waiting to start: {}",
                item.label()
            )));
        }
        ctx.shared.confirm_gate.wait();
        if ctx.shared.abort.is_set() {
            break;
        }
        ctx.shared.set_state(ExperimentState::Running);

        let item = match ctx.queue.current() {
            Some(item) => item.clone(),
            None => break,
        };
        match run_turn(ctx, hardware, &frames, &item)? {
            TurnEnd::Aborted => break,
            TurnEnd::Completed => {
                if ctx.shared.retry.is_set() {
                    ctx.shared.retry.clear();
                    ctx.queue.reset_current();
                    info!(turn = %item.label(), "turn will be redone");
                } else {
                    ctx.queue.advance();
                    ctx.shared.send(EngineEvent::QueueAdvanced {
                        index: ctx.queue.current_index(),
                    });
                    ctx.layout.save_progress(&ctx.queue.progress_snapshot())?;
                }
            }
        }
    }

    if ctx.shared.abort.is_set() {
        Ok(SessionEnd::Aborted)
    } else {
        Ok(SessionEnd::Completed)
    }
}

/// Run all stimuli of one queue item. A pause-interrupted trial discards its
/// recording and retries the same stimulus after resume; an abort keeps the
/// partial recording, logs the trial as aborted and ends the session.
fn run_turn(
    ctx: &mut WorkerCtx,
    hardware: &mut Hardware,
    frames: &FrameTable,
    item: &crate::session::QueueItem,
) -> Result<TurnEnd> {
    let mut stim_idx = 0;
    while stim_idx < item.stimuli.len() {
        if ctx.shared.abort.is_set() {
            return Ok(TurnEnd::Aborted);
        }
        let stimulus = &item.stimuli[stim_idx];
        let stimulus_name = stimulus.display_name();
        let is_last_stimulus = stim_idx + 1 == item.stimuli.len();
        let is_last_queue_item = ctx.queue.current_index() + 1 == ctx.queue.len();
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let video_path = ctx.layout.trial_video_path(
            &item.subject,
            item.repetition,
            &stimulus_name,
            stim_idx + 1,
            &stamp,
        );
        let video_file = video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        ctx.events.log(
            "TRIAL_START",
            &item.subject,
            &stimulus_name,
            item.repetition,
            "",
        );
        let trial_ctx = TrialContext {
            stimulus,
            subject: &item.subject,
            repetition: item.repetition,
            video_path: &video_path,
            is_last_stimulus,
            is_last_queue_item,
        };
        let beeps_per_stimulus =
            ctx.config.timing.training_repetitions + ctx.config.timing.measurement_repetitions;
        let mut observer = ForwardingObserver {
            shared: &ctx.shared,
            beep_base: stim_idx as u32 * beeps_per_stimulus,
            beep_total: item.stimuli.len() as u32 * beeps_per_stimulus,
        };
        let outcome = TrialProtocol::new(
            &ctx.config.timing,
            frames,
            ctx.config.camera.target_frame_rate,
            hardware.display.as_mut(),
            &hardware.audio,
            hardware.camera.as_mut(),
            &ctx.events,
            &ctx.shared.trial_interrupt,
        )
        .run(&trial_ctx, &mut observer)?;

        match outcome {
            TrialOutcome::Completed { frames_captured } => {
                ctx.events.log(
                    "TRIAL_COMPLETED",
                    &item.subject,
                    &stimulus_name,
                    item.repetition,
                    &format!("frames={frames_captured}"),
                );
                ctx.trial_log.log_trial(
                    &item.subject,
                    &stimulus_name,
                    item.repetition,
                    TrialStatus::Completed,
                    &video_file,
                );
                ctx.shared.send(EngineEvent::TrialFinished {
                    subject: item.subject.clone(),
                    stimulus: stimulus_name,
                    repetition: item.repetition,
                    status: TrialStatus::Completed,
                });
                stim_idx += 1;
            }
            TrialOutcome::Interrupted if ctx.shared.abort.is_set() => {
                // Abort keeps whatever was recorded, marked as aborted.
                ctx.events.log(
                    "TRIAL_ABORTED",
                    &item.subject,
                    &stimulus_name,
                    item.repetition,
                    "",
                );
                ctx.trial_log.log_trial(
                    &item.subject,
                    &stimulus_name,
                    item.repetition,
                    TrialStatus::Aborted,
                    &video_file,
                );
                ctx.shared.send(EngineEvent::TrialFinished {
                    subject: item.subject.clone(),
                    stimulus: stimulus_name,
                    repetition: item.repetition,
                    status: TrialStatus::Aborted,
                });
                return Ok(TurnEnd::Aborted);
            }
            TrialOutcome::Interrupted => {
                // Pause: the partial recording is useless, delete it and
                // retry the same stimulus after resume.
                if video_path.exists() {
                    match fs::remove_file(&video_path) {
                        Ok(()) => {
                            ctx.shared
                                .send(EngineEvent::RecordingDiscarded(video_path.clone()));
                        }
                        Err(e) => {
                            warn!(path = %video_path.display(), error = %e,
                                "failed to delete discarded recording");
                        }
                    }
                }
                ctx.events.log(
                    "TRIAL_PAUSED",
                    &item.subject,
                    &stimulus_name,
                    item.repetition,
                    "recording discarded",
                );
                ctx.shared.set_state(ExperimentState::Paused);
                ctx.shared.run_gate.wait();
                if ctx.shared.abort.is_set() {
                    return Ok(TurnEnd::Aborted);
                }
                ctx.shared.trial_interrupt.clear();
                ctx.shared.set_state(ExperimentState::Running);
            }
        }
    }
    Ok(TurnEnd::Completed)
}

/// Mirrors protocol progress onto the engine event stream. Beep progress is
/// re-based so the operator's count runs across the whole turn instead of
/// restarting at every stimulus.
struct ForwardingObserver<'a> {
    shared: &'a Arc<Shared>,
    beep_base: u32,
    beep_total: u32,
}

impl TrialObserver for ForwardingObserver<'_> {
    fn phase_changed(&mut self, phase: TrialPhase, remaining_secs: f64) {
        self.shared.send(EngineEvent::PhaseChanged {
            phase,
            remaining_secs,
        });
    }

    fn stimulus_update(&mut self, text: &str) {
        self.shared.send(EngineEvent::StimulusUpdate(text.to_string()));
    }

    fn beep_progress(&mut self, current: u32, _total: u32) {
        self.shared.send(EngineEvent::BeepProgress {
            current: self.beep_base + current,
            total: self.beep_total,
        });
    }
}
