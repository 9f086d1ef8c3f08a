//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::device::{AudioBackend, CaptureDevice, OutputDevice};
use super::play::AlsaOutput;
use crate::config::Config;
use crate::error::SessionError;
use crate::event::EventSender;

const EPERM: i32 = 1;
const EACCES: i32 = 13;

/// Consecutive XRUN recoveries tolerated before the device is declared lost.
pub(crate) const MAX_RECOVERY_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording), mono float samples.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    period_size: usize,
) -> Result<(PCM, AlsaParams), SessionError> {
    open_pcm(
        device,
        Direction::Capture,
        Format::FloatLE,
        sample_rate,
        1,
        Some(period_size),
        "Capture",
    )
}

/// Open a PCM device for playback, 16-bit samples.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), SessionError> {
    open_pcm(
        device,
        Direction::Playback,
        Format::S16LE,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    format: Format,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), SessionError> {
    let capture = matches!(direction, Direction::Capture);
    let pcm = PCM::new(device, direction, false).map_err(|e| {
        open_error(capture, format!("failed to open PCM device '{}' for {}: {}", device, dir_name, e), &e)
    })?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(device_error)?;
        hwp.set_access(Access::RWInterleaved).map_err(device_error)?;
        hwp.set_format(format).map_err(device_error)?;
        hwp.set_channels(channels).map_err(device_error)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(device_error)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(device_error)?;
        }
        pcm.hw_params(&hwp).map_err(device_error)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current().map_err(device_error)?;
        let rate = hwp.get_rate().map_err(device_error)?;
        let ch = hwp.get_channels().map_err(device_error)?;
        let ps = hwp.get_period_size().map_err(device_error)? as usize;
        (rate, ch, ps)
    };

    // Chunks carry no resampler; a plug device must give us the exact rate.
    if actual_rate != sample_rate {
        return Err(SessionError::Device(format!(
            "{} device '{}' negotiated {}Hz instead of {}Hz",
            dir_name, device, actual_rate, sample_rate
        )));
    }

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

pub(crate) fn device_error(e: alsa::Error) -> SessionError {
    SessionError::Device(e.to_string())
}

// EACCES/EPERM when opening capture: the microphone exists but is not ours to use.
fn open_error(capture: bool, message: String, e: &alsa::Error) -> SessionError {
    let errno = e.errno();
    if capture && (errno == EACCES || errno == EPERM) {
        SessionError::Permission(message)
    } else {
        SessionError::Device(message)
    }
}

// ======================== Capture ========================

pub struct AlsaCapture {
    pcm: Option<PCM>,
}

impl CaptureDevice for AlsaCapture {
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<usize, SessionError> {
        let Some(pcm) = self.pcm.as_ref() else {
            return Ok(0);
        };

        let mut filled = 0;
        let mut retry_count = 0u32;
        while filled < frame.len() {
            let io = pcm.io_f32().map_err(device_error)?;
            match io.readi(&mut frame[filled..]) {
                Ok(n) => {
                    filled += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    retry_count += 1;
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        return Err(device_error(e));
                    }
                    pcm.prepare().map_err(|e2| {
                        log::error!("Failed to recover PCM capture: {}", e2);
                        device_error(e2)
                    })?;
                }
            }
        }
        Ok(filled)
    }

    fn close(&mut self) {
        if self.pcm.take().is_some() {
            log::info!("ALSA capture device released");
        }
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Backend ========================

/// Opens the session's capture and playback devices through ALSA.
#[derive(Debug, Clone)]
pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
    output_gain: f32,
}

impl AlsaBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.to_string(),
            playback_device: config.playback_device.to_string(),
            playback_period_size: config.playback_period_size,
            output_gain: config.output_gain,
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Box<dyn CaptureDevice>, SessionError> {
        let (pcm, _params) = open_capture(&self.capture_device, sample_rate, frame_size)?;
        Ok(Box::new(AlsaCapture { pcm: Some(pcm) }))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        let output = AlsaOutput::open(
            self.playback_device.clone(),
            sample_rate,
            self.playback_period_size,
            self.output_gain,
            events,
        )?;
        Ok(Box::new(output))
    }
}
