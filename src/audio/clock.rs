use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The rendering clock. The engine advances it once per rendered block;
/// everyone else reads it to compute absolute timestamps.
///
/// Time is derived from the number of frames handed to the output device,
/// so it never drifts relative to what is actually audible.
#[derive(Clone)]
pub struct EngineClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl EngineClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate as f64,
        }
    }

    /// Seconds of audio rendered since the engine started.
    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_in_seconds() {
        let clock = EngineClock::new(48_000);
        assert_eq!(clock.now(), 0.0);
        clock.advance(24_000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
        clock.advance(48_000);
        assert!((clock.now() - 1.5).abs() < 1e-12);
    }
}
