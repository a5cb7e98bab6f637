//! Simulated hardware adapters.
//!
//! Deterministic stand-ins for the display, audio and camera adapters, used
//! by the headless CLI and by the test suite. Every adapter records its
//! calls into a shared [`CallLog`] so tests can assert pairing properties
//! (a played tone was stopped, a started recording was closed) without real
//! devices.
//!
//! The simulated display supports an optional per-swap hook for scripted
//! injection (pause or abort at an exact swap index), and an optional
//! realtime mode that sleeps one frame period per swap so interactive runs
//! pace like a real display. Tests leave realtime off and run the whole
//! session at full speed.

use super::{
    AudioAdapter, DisplayAdapter, Hardware, HardwareFactory, InstructionCue, RecordingAdapter,
    SwapCallback, Tone,
};
use crate::config::AudioSettings;
use crate::error::{EngineError, Result};
use crate::stimulus::Stimulus;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared, cloneable record of adapter calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Number of entries starting with `prefix`.
    pub fn count_of(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }
}

/// Called after each completed swap with the running swap count.
pub type SwapHook = Box<dyn FnMut(u64) + Send>;

/// Simulated vsync-locked display with a fixed refresh rate.
pub struct SimDisplay {
    refresh_hz: f64,
    realtime: bool,
    pending: VecDeque<SwapCallback>,
    swap_count: u64,
    clock_secs: f64,
    prepared: HashSet<String>,
    hook: Option<SwapHook>,
    log: CallLog,
    closed: bool,
}

impl SimDisplay {
    pub fn new(refresh_hz: f64, realtime: bool, log: CallLog) -> Self {
        Self {
            refresh_hz,
            realtime,
            pending: VecDeque::new(),
            swap_count: 0,
            clock_secs: 0.0,
            prepared: HashSet::new(),
            hook: None,
            log,
            closed: false,
        }
    }

    pub fn set_swap_hook(&mut self, hook: SwapHook) {
        self.hook = Some(hook);
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }
}

impl DisplayAdapter for SimDisplay {
    fn measure_refresh_rate(&mut self) -> Result<f64> {
        self.log.record("measure_refresh_rate");
        Ok(self.refresh_hz)
    }

    fn prepare_stimulus(&mut self, stimulus: &Stimulus) -> Result<()> {
        let name = stimulus.display_name();
        self.log.record(format!("prepare:{name}"));
        self.prepared.insert(name);
        Ok(())
    }

    fn draw_stimulus(&mut self, stimulus: &Stimulus) {
        self.log.record(format!("draw:{}", stimulus.display_name()));
    }

    fn schedule_on_swap(&mut self, callback: SwapCallback) {
        self.pending.push_back(callback);
    }

    fn swap(&mut self) -> f64 {
        if self.realtime {
            std::thread::sleep(Duration::from_secs_f64(1.0 / self.refresh_hz));
        }
        self.swap_count += 1;
        self.clock_secs += 1.0 / self.refresh_hz;
        // Scheduled callbacks fire at the instant the frame becomes visible,
        // before any further drawing work.
        while let Some(callback) = self.pending.pop_front() {
            callback();
        }
        if let Some(hook) = self.hook.as_mut() {
            hook(self.swap_count);
        }
        self.clock_secs
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.record("close");
        }
    }
}

fn default_instruction_durations() -> HashMap<InstructionCue, f64> {
    HashMap::from([
        (InstructionCue::CloseYourEyes, 2.0),
        (InstructionCue::Starting, 1.0),
        (InstructionCue::OpenYourEyes, 2.0),
        (InstructionCue::NextParticipant, 2.5),
        (InstructionCue::ExperimentCompleted, 3.5),
    ])
}

/// Simulated audio backend. Tones are "prepared" by remembering the exact
/// requested duration, which tests compare against the frame table.
pub struct SimAudio {
    settings: AudioSettings,
    tones: Mutex<HashMap<Tone, f64>>,
    playing: Mutex<HashSet<Tone>>,
    instruction_durations: HashMap<InstructionCue, f64>,
    log: CallLog,
}

impl SimAudio {
    pub fn new(settings: AudioSettings, log: CallLog) -> Self {
        Self {
            settings,
            tones: Mutex::new(HashMap::new()),
            playing: Mutex::new(HashSet::new()),
            instruction_durations: default_instruction_durations(),
            log,
        }
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    /// The duration the tone buffer was generated with, if prepared.
    pub fn tone_duration(&self, tone: Tone) -> Option<f64> {
        self.tones.lock().get(&tone).copied()
    }

    pub fn is_playing(&self, tone: Tone) -> bool {
        self.playing.lock().contains(&tone)
    }
}

impl AudioAdapter for SimAudio {
    fn prepare_tone(&self, tone: Tone, duration_secs: f64) -> Result<()> {
        debug!(tone = %tone, duration_secs, "pre-generating tone");
        self.log.record(format!("prepare_tone:{tone}"));
        self.tones.lock().insert(tone, duration_secs);
        Ok(())
    }

    fn play(&self, tone: Tone) {
        self.log.record(format!("play:{tone}"));
        self.playing.lock().insert(tone);
    }

    fn stop(&self, tone: Tone) {
        self.log.record(format!("stop:{tone}"));
        self.playing.lock().remove(&tone);
    }

    fn play_instruction(&self, cue: InstructionCue) {
        self.log.record(format!("play_instruction:{cue}"));
    }

    fn stop_instruction(&self, cue: InstructionCue) {
        self.log.record(format!("stop_instruction:{cue}"));
    }

    fn instruction_duration(&self, cue: InstructionCue) -> f64 {
        self.instruction_durations.get(&cue).copied().unwrap_or(0.0)
    }
}

struct ActiveRecording {
    path: PathBuf,
    capture_rate_hz: f64,
    started: Instant,
    file: File,
}

/// Simulated camera. Writes a placeholder file on start so discard-on-pause
/// semantics are observable on disk.
pub struct SimRecorder {
    active: Option<ActiveRecording>,
    fail_on_start: bool,
    log: CallLog,
}

impl SimRecorder {
    pub fn new(log: CallLog) -> Self {
        Self {
            active: None,
            fail_on_start: false,
            log,
        }
    }

    /// Scripted fault: the next `start_recording` fails as if the device
    /// were busy.
    pub fn fail_on_start(mut self) -> Self {
        self.fail_on_start = true;
        self
    }
}

impl RecordingAdapter for SimRecorder {
    fn start_recording(&mut self, path: &Path, capture_rate_hz: f64) -> Result<()> {
        self.log.record(format!("start_recording:{}", path.display()));
        if self.fail_on_start {
            return Err(EngineError::Recording("capture device busy".into()));
        }
        if self.active.is_some() {
            return Err(EngineError::Recording("recording already in progress".into()));
        }
        let mut file = File::create(path)?;
        file.write_all(b"SIMVIDEO\n")?;
        self.active = Some(ActiveRecording {
            path: path.to_path_buf(),
            capture_rate_hz,
            started: Instant::now(),
            file,
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<u64> {
        self.log.record("stop_recording");
        let active = self
            .active
            .take()
            .ok_or_else(|| EngineError::Recording("no recording in progress".into()))?;
        let mut file = active.file;
        file.flush()?;
        let frames = (active.started.elapsed().as_secs_f64() * active.capture_rate_hz) as u64;
        debug!(path = %active.path.display(), frames, "simulated recording closed");
        Ok(frames)
    }

    fn is_recording(&self) -> bool {
        self.active.is_some()
    }
}

/// Creates the simulated bundle on the worker thread. Shared between the
/// engine and tests via `Arc`, so tests keep access to the [`CallLog`].
pub struct SimHardwareFactory {
    audio_settings: AudioSettings,
    refresh_hz: f64,
    realtime: bool,
    recorder_fails: bool,
    swap_hook: Mutex<Option<SwapHook>>,
    last_audio: Mutex<Option<Arc<SimAudio>>>,
    log: CallLog,
}

impl SimHardwareFactory {
    pub fn new(refresh_hz: f64, audio_settings: AudioSettings) -> Self {
        Self {
            audio_settings,
            refresh_hz,
            realtime: false,
            recorder_fails: false,
            swap_hook: Mutex::new(None),
            last_audio: Mutex::new(None),
            log: CallLog::new(),
        }
    }

    /// Pace swaps at one frame period of wall time.
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Scripted fault: recording start fails for every created recorder.
    pub fn with_failing_recorder(mut self) -> Self {
        self.recorder_fails = true;
        self
    }

    /// Install a hook invoked after every swap of the next created display.
    pub fn set_swap_hook(&self, hook: SwapHook) {
        *self.swap_hook.lock() = Some(hook);
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// The audio adapter handed out by the most recent [`Self::create`],
    /// kept so tests can inspect prepared tone durations.
    pub fn audio(&self) -> Option<Arc<SimAudio>> {
        self.last_audio.lock().clone()
    }
}

impl HardwareFactory for SimHardwareFactory {
    fn create(&self, screen_index: usize) -> Result<Hardware> {
        debug!(screen_index, refresh_hz = self.refresh_hz, "creating simulated hardware");
        let mut display = SimDisplay::new(self.refresh_hz, self.realtime, self.log.clone());
        if let Some(hook) = self.swap_hook.lock().take() {
            display.set_swap_hook(hook);
        }
        let mut camera = SimRecorder::new(self.log.clone());
        if self.recorder_fails {
            camera = camera.fail_on_start();
        }
        let audio = Arc::new(SimAudio::new(self.audio_settings.clone(), self.log.clone()));
        *self.last_audio.lock() = Some(Arc::clone(&audio));
        Ok(Hardware {
            display: Box::new(display),
            audio,
            camera: Box::new(camera),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_runs_callbacks_in_fifo_order() {
        let log = CallLog::new();
        let mut display = SimDisplay::new(60.0, false, log.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            display.schedule_on_swap(Box::new(move || order.lock().push(label)));
        }
        display.swap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
        // Callbacks are one-shot.
        display.swap();
        assert_eq!(order.lock().len(), 2);
    }

    #[test]
    fn recorder_creates_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trial.mp4");
        let log = CallLog::new();
        let mut rec = SimRecorder::new(log.clone());
        assert!(!rec.is_recording());
        rec.start_recording(&path, 500.0).unwrap();
        assert!(rec.is_recording());
        assert!(path.exists());
        rec.stop_recording().unwrap();
        assert!(!rec.is_recording());
        assert_eq!(log.count_of("start_recording"), 1);
        assert_eq!(log.count_of("stop_recording"), 1);
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let mut rec = SimRecorder::new(CallLog::new());
        assert!(rec.stop_recording().is_err());
    }

    #[test]
    fn audio_tracks_playing_set() {
        let audio = SimAudio::new(AudioSettings::default(), CallLog::new());
        audio.play(Tone::Training);
        assert!(audio.is_playing(Tone::Training));
        audio.stop(Tone::Training);
        assert!(!audio.is_playing(Tone::Training));
    }
}
