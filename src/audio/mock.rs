//! Hardware-free audio devices for tests.
//!
//! `MockOutput` runs on a manual clock: nothing ends until the test calls
//! [`MockOutputHandle::advance_to`], and every source keeps a record of how
//! it finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::codec::InboundAudioChunk;
use super::device::{AudioBackend, CaptureDevice, OutputDevice, SourceId};
use crate::error::SessionError;
use crate::event::{EventSender, SessionEvent};

// Float comparisons on the mock clock.
const EPSILON: f64 = 1e-9;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ======================== Capture ========================

/// Scripted microphone.
///
/// Frame `k` (counting from 1) is filled with `k / 1000`, so tests can tell
/// frames apart after a PCM16 round trip.
pub struct MockCaptureDevice {
    frame_size: usize,
    period: Duration,
    remaining: Option<usize>,
    fail_at_end: bool,
    produced: usize,
    read_times: Arc<Mutex<Vec<Instant>>>,
    released: Arc<AtomicBool>,
}

impl MockCaptureDevice {
    fn build(frame_size: usize, period: Duration, remaining: Option<usize>, fail_at_end: bool) -> Self {
        Self {
            frame_size,
            period,
            remaining,
            fail_at_end,
            produced: 0,
            read_times: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `frames` distinct frames, one per `period`, then end of input.
    pub fn counting(frames: usize, frame_size: usize, period: Duration) -> Self {
        Self::build(frame_size, period, Some(frames), false)
    }

    /// `frames` frames, then a device error.
    pub fn failing_after(frames: usize, frame_size: usize) -> Self {
        Self::build(frame_size, Duration::ZERO, Some(frames), true)
    }

    /// Frames forever, one per `period`.
    pub fn endless(frame_size: usize, period: Duration) -> Self {
        Self::build(frame_size, period, None, false)
    }

    /// When each frame was handed to the capture loop.
    pub fn read_times(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.read_times.clone()
    }

    /// Set once the device has been closed.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<usize, SessionError> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(0);
        }
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                if self.fail_at_end {
                    return Err(SessionError::Device("mock capture device failed".to_string()));
                }
                return Ok(0);
            }
            self.remaining = Some(remaining - 1);
        }

        if !self.period.is_zero() {
            thread::sleep(self.period);
        }

        self.produced += 1;
        let n = frame.len().min(self.frame_size);
        frame[..n].fill(self.produced as f32 / 1000.0);
        lock(&self.read_times).push(Instant::now());
        Ok(n)
    }

    fn close(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockCaptureDevice {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Output ========================

/// How a scheduled source left the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFate {
    Playing,
    /// Played to its natural end.
    Ended,
    /// Hard-stopped before its end.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
    pub fate: SourceFate,
    pub stopped_at: Option<f64>,
}

impl SourceRecord {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether this source is audible at device time `t`.
    pub fn audible_at(&self, t: f64) -> bool {
        let cut = self.stopped_at.unwrap_or(f64::INFINITY);
        self.start_time <= t + EPSILON && t < self.end_time() - EPSILON && t < cut - EPSILON
    }
}

struct OutputState {
    now: f64,
    sample_rate: u32,
    sources: Vec<SourceRecord>,
    closed: bool,
    events: EventSender,
}

/// Output device on a manual clock.
pub struct MockOutput {
    state: Arc<Mutex<OutputState>>,
}

/// Test-side view of a [`MockOutput`].
#[derive(Clone)]
pub struct MockOutputHandle {
    state: Arc<Mutex<OutputState>>,
}

impl MockOutput {
    pub fn new(sample_rate: u32, events: EventSender) -> (Self, MockOutputHandle) {
        let state = Arc::new(Mutex::new(OutputState {
            now: 0.0,
            sample_rate,
            sources: Vec::new(),
            closed: false,
            events,
        }));
        (
            Self {
                state: state.clone(),
            },
            MockOutputHandle { state },
        )
    }
}

impl OutputDevice for MockOutput {
    fn current_time(&self) -> f64 {
        lock(&self.state).now
    }

    fn start_source(
        &mut self,
        id: SourceId,
        chunk: InboundAudioChunk,
        when: f64,
    ) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(SessionError::Device("output device is closed".to_string()));
        }
        if chunk.sample_rate != state.sample_rate {
            return Err(SessionError::Device(format!(
                "chunk rate {}Hz does not match output rate {}Hz",
                chunk.sample_rate, state.sample_rate
            )));
        }
        state.sources.push(SourceRecord {
            id,
            start_time: when,
            duration: chunk.duration(),
            fate: SourceFate::Playing,
            stopped_at: None,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = lock(&self.state);
        let now = state.now;
        if let Some(record) = state
            .sources
            .iter_mut()
            .find(|r| r.id == id && r.fate == SourceFate::Playing)
        {
            record.fate = SourceFate::Stopped;
            record.stopped_at = Some(now);
        }
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        let now = state.now;
        for record in state.sources.iter_mut().filter(|r| r.fate == SourceFate::Playing) {
            record.fate = SourceFate::Stopped;
            record.stopped_at = Some(now);
        }
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl MockOutputHandle {
    pub fn now(&self) -> f64 {
        lock(&self.state).now
    }

    /// Move the clock forward and end every source that finished by `t`.
    ///
    /// Ends are reported in end-time order. The clock never moves backwards.
    pub fn advance_to(&self, t: f64) {
        let mut state = lock(&self.state);
        if t > state.now {
            state.now = t;
        }
        let now = state.now;
        let mut ended: Vec<(f64, SourceId)> = Vec::new();
        for record in state.sources.iter_mut() {
            if record.fate == SourceFate::Playing && record.end_time() <= now + EPSILON {
                record.fate = SourceFate::Ended;
                ended.push((record.end_time(), record.id));
            }
        }
        ended.sort_by(|a, b| a.0.total_cmp(&b.0));
        if !state.closed {
            for (_, id) in ended {
                let _ = state.events.send(SessionEvent::SourceEnded(id));
            }
        }
    }

    pub fn advance_by(&self, dt: f64) {
        let now = self.now();
        self.advance_to(now + dt);
    }

    pub fn sources(&self) -> Vec<SourceRecord> {
        lock(&self.state).sources.clone()
    }

    pub fn source(&self, id: SourceId) -> Option<SourceRecord> {
        lock(&self.state).sources.iter().find(|r| r.id == id).cloned()
    }

    /// Ids audible at device time `t`.
    pub fn audible_at(&self, t: f64) -> Vec<SourceId> {
        lock(&self.state)
            .sources
            .iter()
            .filter(|r| r.audible_at(t))
            .map(|r| r.id)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn sample_rate(&self) -> u32 {
        lock(&self.state).sample_rate
    }
}

// ======================== Backend ========================

struct BackendState {
    deny_microphone: bool,
    fail_output: bool,
    capture_period: Duration,
    input_rates: Vec<u32>,
    input_flags: Vec<Arc<AtomicBool>>,
    outputs: Vec<MockOutputHandle>,
}

/// Backend handing out mock devices and remembering each one.
#[derive(Clone)]
pub struct MockAudioBackend {
    state: Arc<Mutex<BackendState>>,
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                deny_microphone: false,
                fail_output: false,
                capture_period: Duration::from_millis(10),
                input_rates: Vec::new(),
                input_flags: Vec::new(),
                outputs: Vec::new(),
            })),
        }
    }

    /// Opening the microphone fails with a permission error.
    pub fn deny_microphone(&self) {
        lock(&self.state).deny_microphone = true;
    }

    /// Opening the output fails with a device error.
    pub fn fail_output(&self) {
        lock(&self.state).fail_output = true;
    }

    pub fn set_capture_period(&self, period: Duration) {
        lock(&self.state).capture_period = period;
    }

    /// Output device of the most recent session.
    pub fn output(&self) -> Option<MockOutputHandle> {
        lock(&self.state).outputs.last().cloned()
    }

    pub fn inputs_opened(&self) -> usize {
        lock(&self.state).input_flags.len()
    }

    pub fn outputs_opened(&self) -> usize {
        lock(&self.state).outputs.len()
    }

    pub fn input_rates(&self) -> Vec<u32> {
        lock(&self.state).input_rates.clone()
    }

    /// True when every device ever opened has been closed again.
    pub fn all_released(&self) -> bool {
        let state = lock(&self.state);
        state.input_flags.iter().all(|f| f.load(Ordering::SeqCst))
            && state.outputs.iter().all(|o| o.is_closed())
    }
}

impl AudioBackend for MockAudioBackend {
    fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Box<dyn CaptureDevice>, SessionError> {
        let mut state = lock(&self.state);
        if state.deny_microphone {
            return Err(SessionError::Permission("microphone access denied".to_string()));
        }
        let device = MockCaptureDevice::endless(frame_size, state.capture_period);
        state.input_rates.push(sample_rate);
        state.input_flags.push(device.released_flag());
        Ok(Box::new(device))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        let mut state = lock(&self.state);
        if state.fail_output {
            return Err(SessionError::Device("no output device".to_string()));
        }
        let (output, handle) = MockOutput::new(sample_rate, events);
        state.outputs.push(handle);
        Ok(Box::new(output))
    }
}
