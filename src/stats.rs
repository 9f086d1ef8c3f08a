use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters shared between the capture thread and the controller task.
///
/// Everything here is a relaxed atomic: the numbers are diagnostics, not
/// synchronisation.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped_not_ready: AtomicU64,
    frames_dropped_backpressure: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_malformed: AtomicU64,
    decodes_discarded: AtomicU64,
    input_level: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_dropped_not_ready: u64,
    pub frames_dropped_backpressure: u64,
    pub chunks_scheduled: u64,
    pub chunks_malformed: u64,
    pub decodes_discarded: u64,
    pub input_level: f32,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self, level: f32) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.input_level.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_not_ready(&self) {
        self.frames_dropped_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_backpressure(&self) {
        self.frames_dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self) {
        self.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.chunks_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: usize) {
        self.decodes_discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// RMS of the most recent capture frame, in [0, 1].
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input_level.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_sent,
            &self.frames_dropped_not_ready,
            &self.frames_dropped_backpressure,
            &self.chunks_scheduled,
            &self.chunks_malformed,
            &self.decodes_discarded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.input_level.store(0f32.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped_not_ready: self.frames_dropped_not_ready.load(Ordering::Relaxed),
            frames_dropped_backpressure: self
                .frames_dropped_backpressure
                .load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_malformed: self.chunks_malformed.load(Ordering::Relaxed),
            decodes_discarded: self.decodes_discarded.load(Ordering::Relaxed),
            input_level: self.input_level(),
        }
    }
}

/// Root-mean-square level of a frame.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_counters_and_level() {
        let stats = SessionStats::new();
        stats.record_captured(0.5);
        stats.record_sent();
        stats.record_discarded(3);
        assert_eq!(stats.snapshot().frames_captured, 1);
        assert_eq!(stats.snapshot().decodes_discarded, 3);
        assert_eq!(stats.input_level(), 0.5);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
