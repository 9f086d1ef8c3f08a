//! audio - capture, playback and PCM16 codec
//!
//! ALSA drives both directions on dedicated threads (`audio-record`,
//! `audio-play`). The session core only sees the traits in [`device`].

mod alsa_device;
pub mod codec;
pub mod decode_queue;
pub mod device;
pub mod mock;
mod play;
pub mod record;
pub mod scheduler;

pub use alsa_device::{AlsaBackend, AlsaCapture};
pub use codec::{AudioFrame, EncodedBlob, FrameDecoder, FrameEncoder, InboundAudioChunk};
pub use decode_queue::DecodeQueue;
pub use device::{AudioBackend, CaptureDevice, OutputDevice, SourceId};
pub use play::AlsaOutput;
pub use record::CaptureLoop;
pub use scheduler::{PlaybackScheduler, ScheduledSource};
