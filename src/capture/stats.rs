//! Capture statistics

use std::fmt;

/// Frame statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct FrameStats {
    /// Total frames copied into the sink
    pub total_frames: u64,

    /// Frames dropped because the snapshot or the copy failed
    pub skipped_frames: u64,

    /// Total bytes copied
    pub total_bytes: u64,

    /// Total capture time in microseconds
    pub total_capture_time_us: u64,

    /// Last capture time in microseconds
    pub last_capture_time_us: u64,
}

impl FrameStats {
    /// Record a frame capture
    pub fn record_capture(&mut self, bytes: usize, time_us: u64) {
        self.total_frames += 1;
        self.total_bytes += bytes as u64;
        self.last_capture_time_us = time_us;
        self.total_capture_time_us += time_us;
    }

    pub fn record_skip(&mut self) {
        self.skipped_frames += 1;
    }

    /// Mean capture time in microseconds
    pub fn average_capture_time_us(&self) -> u64 {
        if self.total_frames == 0 {
            return 0;
        }
        self.total_capture_time_us / self.total_frames
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} skipped), {} bytes, last {}us, avg {}us",
            self.total_frames,
            self.skipped_frames,
            self.total_bytes,
            self.last_capture_time_us,
            self.average_capture_time_us()
        )
    }
}
