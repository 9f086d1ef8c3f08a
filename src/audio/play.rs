//! ALSA playback renderer.
//!
//! A dedicated `audio-play` thread pulls one period at a time from a
//! [`Timeline`] of scheduled sources, applies the output gain and writes it
//! to the PCM device. The number of frames rendered so far is the output
//! clock the scheduler reads through [`OutputDevice::current_time`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;

use super::alsa_device::{self, AlsaParams, MAX_RECOVERY_RETRIES, device_error};
use super::codec::{InboundAudioChunk, float_to_pcm16};
use super::device::{OutputDevice, SourceId};
use crate::error::SessionError;
use crate::event::{EventSender, SessionEvent};

struct Voice {
    id: SourceId,
    samples: Vec<f32>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sources laid out on the device's frame clock.
#[derive(Default)]
pub(crate) struct Timeline {
    voices: Vec<Voice>,
    frames_rendered: u64,
}

impl Timeline {
    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Place a source. A start already behind the cursor plays from the
    /// cursor instead of losing its head.
    pub(crate) fn insert(&mut self, id: SourceId, samples: Vec<f32>, start_frame: u64) {
        let start_frame = start_frame.max(self.frames_rendered);
        self.voices.push(Voice {
            id,
            samples,
            start_frame,
        });
    }

    pub(crate) fn remove(&mut self, id: SourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.voices.clear();
    }

    /// Mix the next `out.len()` frames, advance the clock and return the
    /// sources whose last frame was just rendered.
    pub(crate) fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.fill(0.0);
        let start = self.frames_rendered;
        let end = start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(start);
            let to = voice.end_frame().min(end);
            for frame in from..to {
                out[(frame - start) as usize] +=
                    voice.samples[(frame - voice.start_frame) as usize];
            }
        }
        self.frames_rendered = end;

        let mut ended = Vec::new();
        self.voices.retain(|v| {
            if v.end_frame() <= end {
                ended.push(v.id);
                false
            } else {
                true
            }
        });
        ended
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|e| e.into_inner())
}

/// Output device backed by an ALSA playback PCM.
pub struct AlsaOutput {
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    play_handle: Option<JoinHandle<()>>,
}

impl AlsaOutput {
    /// Open the device on the playback thread and wait until it is ready.
    pub fn open(
        device: String,
        sample_rate: u32,
        period_size: usize,
        gain: f32,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), SessionError>>(1);

        let play_handle = {
            let timeline = timeline.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let period_size_opt = if period_size > 0 { Some(period_size) } else { None };
                    let (pcm, params) = match alsa_device::open_playback(
                        &device,
                        sample_rate,
                        1,
                        period_size_opt,
                    ) {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    if let Err(e) = play_thread(&pcm, &params, &timeline, gain, &events, &running) {
                        log::error!("Playback thread error: {}", e);
                        if running.load(Ordering::SeqCst) {
                            let _ = events.send(SessionEvent::DeviceFailed(e));
                        }
                    }
                })
                .map_err(|e| {
                    SessionError::Device(format!("failed to spawn playback thread: {}", e))
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                timeline,
                sample_rate,
                running,
                play_handle: Some(play_handle),
            }),
            Ok(Err(e)) => {
                let _ = play_handle.join();
                Err(e)
            }
            Err(_) => Err(SessionError::Device(
                "playback thread exited during startup".to_string(),
            )),
        }
    }
}

impl OutputDevice for AlsaOutput {
    fn current_time(&self) -> f64 {
        lock(&self.timeline).frames_rendered() as f64 / f64::from(self.sample_rate)
    }

    fn start_source(
        &mut self,
        id: SourceId,
        chunk: InboundAudioChunk,
        when: f64,
    ) -> Result<(), SessionError> {
        if self.play_handle.is_none() {
            return Err(SessionError::Device("output device is closed".to_string()));
        }
        if chunk.sample_rate != self.sample_rate {
            return Err(SessionError::Device(format!(
                "chunk rate {}Hz does not match output rate {}Hz",
                chunk.sample_rate, self.sample_rate
            )));
        }
        let start_frame = (when.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        lock(&self.timeline).insert(id, chunk.samples, start_frame);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        lock(&self.timeline).remove(id);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.timeline).clear();
        if let Some(h) = self.play_handle.take() {
            let _ = h.join();
            log::info!("ALSA playback device released");
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Playback thread ========================

fn play_thread(
    pcm: &PCM,
    params: &AlsaParams,
    timeline: &Mutex<Timeline>,
    gain: f32,
    events: &EventSender,
    running: &AtomicBool,
) -> Result<(), SessionError> {
    let io = pcm.io_i16().map_err(device_error)?;
    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);

    let mut mix = vec![0f32; period];
    let mut pcm_data = vec![0i16; period * channels];

    log::info!(
        "Playback started: rate={}, ch={}, period={}, gain={}",
        params.sample_rate,
        channels,
        period,
        gain,
    );

    while running.load(Ordering::Relaxed) {
        let ended = lock(timeline).render(&mut mix);
        for id in ended {
            let _ = events.send(SessionEvent::SourceEnded(id));
        }

        // Single gain stage, then mono → device channel layout.
        for (i, sample) in mix.iter().enumerate() {
            let value = float_to_pcm16(sample * gain);
            for c in 0..channels {
                pcm_data[i * channels + c] = value;
            }
        }

        // Write with retry loop to handle short writes and XRUN recovery.
        let total_frames = period;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&pcm_data[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(device_error(e2));
                    }

                    if retry_count >= MAX_RECOVERY_RETRIES {
                        return Err(SessionError::Device(format!(
                            "playback kept failing after {} recoveries: {}",
                            retry_count, e
                        )));
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
