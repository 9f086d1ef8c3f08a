//! Capture loop: device → PCM16 encode → outbound queue.
//!
//! Runs on a dedicated `audio-record` OS thread (not a tokio task) so the
//! hardware cadence never competes with network tasks. The loop never waits
//! on the network: every frame is offered to the outbound queue with a
//! non-blocking send, and frames offered before the channel is ready are
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::codec::FrameEncoder;
use super::device::CaptureDevice;
use crate::channel::{Offer, OutboundGate};
use crate::error::SessionError;
use crate::event::{EventSender, SessionEvent};
use crate::stats::{SessionStats, rms};

pub struct CaptureLoop {
    running: Arc<AtomicBool>,
    record_handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    /// Spawn the capture thread. It owns `device` until it exits.
    pub fn start(
        device: Box<dyn CaptureDevice>,
        frame_size: usize,
        encoder: FrameEncoder,
        outbound: OutboundGate,
        stats: Arc<SessionStats>,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));

        let record_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    let mut device = device;
                    let result = record_thread(
                        device.as_mut(),
                        frame_size,
                        &encoder,
                        &outbound,
                        &stats,
                        &running,
                    );
                    device.close();
                    if let Err(e) = result {
                        log::error!("Recording thread error: {}", e);
                        if running.load(Ordering::SeqCst) {
                            let _ = events.send(SessionEvent::DeviceFailed(e));
                        }
                    }
                })
                .map_err(|e| SessionError::Device(format!("failed to spawn capture thread: {}", e)))?
        };

        Ok(Self {
            running,
            record_handle: Some(record_handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.record_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it to release the device.
    ///
    /// Blocks for at most one frame period. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_thread(
    device: &mut dyn CaptureDevice,
    frame_size: usize,
    encoder: &FrameEncoder,
    outbound: &OutboundGate,
    stats: &SessionStats,
    running: &AtomicBool,
) -> Result<(), SessionError> {
    let mut frame = vec![0f32; frame_size];

    log::info!(
        "Recording started: rate={}, frame_size={}",
        encoder.sample_rate(),
        frame_size,
    );

    while running.load(Ordering::Relaxed) {
        let read = device.read_frame(&mut frame)?;
        if read == 0 {
            log::info!("Capture device reached end of input");
            break;
        }
        let samples = &frame[..read];
        stats.record_captured(rms(samples));

        if !outbound.is_ready() {
            stats.record_dropped_not_ready();
            continue;
        }

        match outbound.offer(encoder.encode(samples)) {
            Offer::Sent => stats.record_sent(),
            Offer::NotReady => stats.record_dropped_not_ready(),
            Offer::Full => {
                stats.record_dropped_backpressure();
                log::debug!("Outbound queue full, dropping capture frame");
            }
            Offer::Closed => {
                log::info!("Outbound channel closed, capture loop exiting");
                break;
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{FrameDecoder, INPUT_SAMPLE_RATE};
    use crate::audio::mock::MockCaptureDevice;
    use crate::event::event_queue;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    fn wait_finished(capture: &CaptureLoop) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while capture.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn frames_before_ready_are_dropped() {
        let (tx, mut rx) = mpsc::channel(16);
        let gate = OutboundGate::new(tx);
        let stats = Arc::new(SessionStats::new());
        let (events, _events_rx) = event_queue();

        let device = MockCaptureDevice::counting(4, 8, Duration::ZERO);
        let mut capture = CaptureLoop::start(
            Box::new(device),
            8,
            FrameEncoder::new(INPUT_SAMPLE_RATE),
            gate,
            stats.clone(),
            events,
        )
        .unwrap();
        wait_finished(&capture);
        capture.stop();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 4);
        assert_eq!(snapshot.frames_dropped_not_ready, 4);
        assert_eq!(snapshot.frames_sent, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn frames_are_sent_in_capture_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let gate = OutboundGate::new(tx);
        gate.set_ready();
        let stats = Arc::new(SessionStats::new());
        let (events, _events_rx) = event_queue();

        let device = MockCaptureDevice::counting(5, 16, Duration::ZERO);
        let mut capture = CaptureLoop::start(
            Box::new(device),
            16,
            FrameEncoder::new(INPUT_SAMPLE_RATE),
            gate,
            stats.clone(),
            events,
        )
        .unwrap();
        wait_finished(&capture);
        capture.stop();

        let decoder = FrameDecoder::new(INPUT_SAMPLE_RATE);
        let mut firsts = Vec::new();
        while let Ok(blob) = rx.try_recv() {
            assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
            firsts.push(decoder.decode(&blob.data).unwrap().samples[0]);
        }
        assert_eq!(firsts.len(), 5);
        assert!(firsts.windows(2).all(|w| w[0] < w[1]), "{:?}", firsts);
        assert_eq!(stats.snapshot().frames_sent, 5);
    }

    #[test]
    fn stalled_outbound_queue_never_delays_capture() {
        // Capacity 1 and nobody draining: every send after the first fails.
        let (tx, _rx) = mpsc::channel(1);
        let gate = OutboundGate::new(tx);
        gate.set_ready();
        let stats = Arc::new(SessionStats::new());
        let (events, _events_rx) = event_queue();

        let period = Duration::from_millis(5);
        let device = MockCaptureDevice::counting(20, 32, period);
        let reads = device.read_times();
        let mut capture = CaptureLoop::start(
            Box::new(device),
            32,
            FrameEncoder::new(INPUT_SAMPLE_RATE),
            gate,
            stats.clone(),
            events,
        )
        .unwrap();
        wait_finished(&capture);
        capture.stop();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 20);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.frames_dropped_backpressure, 19);

        // Consecutive reads stay within one extra frame period of each other.
        let reads = reads.lock().unwrap();
        for pair in reads.windows(2) {
            assert!(pair[1] - pair[0] < period * 2 + Duration::from_millis(20));
        }
    }

    #[test]
    fn device_failure_is_reported_to_the_session() {
        let (tx, _rx) = mpsc::channel(4);
        let gate = OutboundGate::new(tx);
        let stats = Arc::new(SessionStats::new());
        let (events, mut events_rx) = event_queue();

        let device = MockCaptureDevice::failing_after(2, 8);
        let released = device.released_flag();
        let mut capture = CaptureLoop::start(
            Box::new(device),
            8,
            FrameEncoder::new(INPUT_SAMPLE_RATE),
            gate,
            stats,
            events,
        )
        .unwrap();
        wait_finished(&capture);
        capture.stop();

        assert!(matches!(
            events_rx.try_recv(),
            Ok(SessionEvent::DeviceFailed(SessionError::Device(_)))
        ));
        assert!(released.load(Ordering::SeqCst));
    }
}
