//! Gapless sequential playback of inbound chunks.
//!
//! The scheduler is the only owner of the output device, the set of active
//! sources and the playback clock. It is driven from the controller task
//! alone, so none of its state is shared.

use std::collections::HashMap;

use super::codec::InboundAudioChunk;
use super::device::{OutputDevice, SourceId};
use crate::error::SessionError;

/// A chunk bound to its start time on the output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    active: HashMap<SourceId, ScheduledSource>,
    next_start_time: f64,
    next_id: SourceId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputDevice>) -> Self {
        Self {
            output,
            active: HashMap::new(),
            next_start_time: 0.0,
            next_id: 1,
            closed: false,
        }
    }

    /// Schedule `chunk` right after everything already queued, or now if
    /// the queue has drained.
    pub fn schedule(&mut self, chunk: InboundAudioChunk) -> Result<ScheduledSource, SessionError> {
        if self.closed {
            return Err(SessionError::Device("playback scheduler is closed".to_string()));
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let id = self.next_id;
        self.next_id += 1;

        let source = ScheduledSource {
            id,
            start_time,
            duration: chunk.duration(),
        };
        self.output.start_source(id, chunk, start_time)?;
        self.active.insert(id, source);
        self.next_start_time = source.end_time();

        log::debug!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} active)",
            id,
            start_time,
            source.duration,
            self.active.len()
        );
        Ok(source)
    }

    /// Drop a naturally finished source.
    ///
    /// Returns true when this emptied the active set. Ends of sources that
    /// were already stopped are ignored.
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some() && self.active.is_empty()
    }

    /// Hard-stop every active source and restart the clock at device time.
    ///
    /// Returns how many sources were stopped.
    pub fn immediate_stop(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.drain().map(|(id, _)| id) {
            self.output.stop_source(id);
        }
        // Device time, never zero: a zero clock lands the next chunk in the past.
        self.next_start_time = self.output.current_time();
        stopped
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop everything and release the output device. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.immediate_stop();
        self.output.close();
        self.closed = true;
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::OUTPUT_SAMPLE_RATE;
    use crate::audio::mock::{MockOutput, MockOutputHandle, SourceFate};
    use crate::event::{EventReceiver, SessionEvent, event_queue};

    fn scheduler() -> (PlaybackScheduler, MockOutputHandle, EventReceiver) {
        let (events, rx) = event_queue();
        let (output, handle) = MockOutput::new(OUTPUT_SAMPLE_RATE, events);
        (PlaybackScheduler::new(Box::new(output)), handle, rx)
    }

    fn chunk(seconds: f64) -> InboundAudioChunk {
        let len = (seconds * f64::from(OUTPUT_SAMPLE_RATE)).round() as usize;
        InboundAudioChunk::new(vec![0.1; len], OUTPUT_SAMPLE_RATE)
    }

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn consecutive_chunks_are_back_to_back() {
        let (mut scheduler, handle, _rx) = scheduler();
        handle.advance_to(0.2);

        let a = scheduler.schedule(chunk(0.5)).unwrap();
        let b = scheduler.schedule(chunk(0.25)).unwrap();
        let c = scheduler.schedule(chunk(0.75)).unwrap();

        assert!(close_to(a.start_time, 0.2));
        assert!(close_to(b.start_time, a.start_time + 0.5));
        assert!(close_to(c.start_time, b.start_time + 0.25));
        assert!(close_to(scheduler.next_start_time(), 1.7));
        assert_eq!(scheduler.active_count(), 3);
    }

    #[test]
    fn drained_queue_restarts_at_device_time() {
        let (mut scheduler, handle, _rx) = scheduler();
        let a = scheduler.schedule(chunk(0.5)).unwrap();
        assert!(scheduler.source_ended(a.id));

        // The clock moved past the old end; no chunk may start in the past.
        handle.advance_to(2.0);
        let b = scheduler.schedule(chunk(0.5)).unwrap();
        assert!(close_to(b.start_time, 2.0));
    }

    #[test]
    fn speaking_ends_with_last_source() {
        let (mut scheduler, handle, mut rx) = scheduler();
        let a = scheduler.schedule(chunk(0.5)).unwrap();
        let b = scheduler.schedule(chunk(0.5)).unwrap();
        assert!(scheduler.is_speaking());

        handle.advance_to(0.5);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::SourceEnded(id)) if id == a.id));
        assert!(!scheduler.source_ended(a.id));
        assert!(scheduler.is_speaking());

        handle.advance_to(1.0);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::SourceEnded(id)) if id == b.id));
        assert!(scheduler.source_ended(b.id));
        assert!(!scheduler.is_speaking());
    }

    #[test]
    fn interruption_resets_clock_to_device_time_not_zero() {
        let (mut scheduler, handle, _rx) = scheduler();
        let a = scheduler.schedule(chunk(1.0)).unwrap();
        let queued = scheduler.schedule(chunk(1.0)).unwrap();

        handle.advance_to(0.3);
        assert_eq!(scheduler.immediate_stop(), 2);
        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.active_count(), 0);

        // Resetting to 0.0 would put the next chunk 0.3s in the past.
        assert!(close_to(scheduler.next_start_time(), 0.3));
        let b = scheduler.schedule(chunk(0.5)).unwrap();
        assert!(close_to(b.start_time, 0.3));
        assert!(b.start_time >= handle.now());

        assert_eq!(handle.source(a.id).unwrap().fate, SourceFate::Stopped);
        assert_eq!(handle.source(queued.id).unwrap().fate, SourceFate::Stopped);
        assert_eq!(handle.audible_at(0.4), vec![b.id]);
    }

    #[test]
    fn end_of_stopped_source_is_ignored() {
        let (mut scheduler, _handle, _rx) = scheduler();
        let a = scheduler.schedule(chunk(0.5)).unwrap();
        scheduler.immediate_stop();
        let b = scheduler.schedule(chunk(0.5)).unwrap();

        assert!(!scheduler.source_ended(a.id));
        assert!(scheduler.is_speaking());
        assert!(scheduler.source_ended(b.id));
    }

    #[test]
    fn close_is_idempotent_and_releases_output() {
        let (mut scheduler, handle, _rx) = scheduler();
        scheduler.schedule(chunk(0.5)).unwrap();
        scheduler.close();
        scheduler.close();

        assert!(scheduler.is_closed());
        assert!(handle.is_closed());
        assert!(!scheduler.is_speaking());
        assert!(scheduler.schedule(chunk(0.5)).is_err());
    }
}
