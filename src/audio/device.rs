//! Device seams between the session core and the audio hardware.
//!
//! The ALSA implementations live in `alsa_device` and `play`; `mock`
//! provides hardware-free stand-ins for tests.

use crate::audio::codec::InboundAudioChunk;
use crate::error::SessionError;
use crate::event::EventSender;

/// Identity of one scheduled playback source.
pub type SourceId = u64;

/// Input side: delivers fixed-size frames at the hardware cadence.
pub trait CaptureDevice: Send {
    /// Block until `frame` is filled with the next samples.
    ///
    /// Returns the number of samples written. `Ok(0)` means the device has
    /// no more input and the capture loop should finish.
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<usize, SessionError>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Output side: a clock plus sources scheduled against it.
///
/// When a source reaches its natural end the device posts
/// [`SessionEvent::SourceEnded`](crate::event::SessionEvent::SourceEnded)
/// on the queue it was opened with. A source removed through
/// [`stop_source`](OutputDevice::stop_source) never reports an end.
pub trait OutputDevice: Send {
    /// Current device time in seconds.
    fn current_time(&self) -> f64;

    /// Begin playing `chunk` exactly at device time `when`.
    fn start_source(
        &mut self,
        id: SourceId,
        chunk: InboundAudioChunk,
        when: f64,
    ) -> Result<(), SessionError>;

    /// Hard-stop a source. Unknown ids are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Factory for the input/output pair of one session.
pub trait AudioBackend: Send + Sync {
    fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Box<dyn CaptureDevice>, SessionError>;

    fn open_output(
        &self,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn OutputDevice>, SessionError>;
}
