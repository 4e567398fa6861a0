use super::frame::StereoFrame;
use super::ids::{BatchId, SampleId, VoiceId};
use super::sample_buffer::SampleBuffer;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// One sounding instance of a sample: its own read position, gain, and
/// release envelope. Created per trigger, retired exactly once when either
/// the buffer runs out or the release ramp reaches zero.
#[derive(Clone, Debug)]
pub struct Voice {
    pub id: VoiceId,
    pub sample: SampleId,
    pub batch: Option<BatchId>,
    pos: f64,
    rate: f64,
    gain: f32,
    started_at: f64,
    decay: f64,
    release_at: Option<f64>,
    stop_at: Option<f64>,
    active: bool,
}

impl Voice {
    pub fn new(
        id: VoiceId,
        sample: SampleId,
        batch: Option<BatchId>,
        gain: f32,
        detune_cents: f64,
        decay_seconds: f64,
        started_at: f64,
    ) -> Self {
        Self {
            id,
            sample,
            batch,
            pos: 0.0,
            // equal temperament: 1200 cents per octave
            rate: (detune_cents / 1200.0).exp2(),
            gain,
            started_at,
            decay: decay_seconds,
            release_at: None,
            stop_at: None,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin the release fade at `at`. Idempotent: a second call does not
    /// reschedule, it returns the stop time computed by the first.
    pub fn release(&mut self, at: f64) -> f64 {
        if let Some(stop_at) = self.stop_at {
            return stop_at;
        }
        let stop_at = at + self.decay;
        self.release_at = Some(at);
        self.stop_at = Some(stop_at);
        stop_at
    }

    /// Mix this voice into `out`, which starts at absolute time `block_start`.
    /// Frames before `started_at` are skipped, which is what makes scheduled
    /// triggers land sample-accurately inside a block.
    pub fn render_into(&mut self, buffer: &SampleBuffer, out: &mut [StereoFrame], block_start: f64, sample_rate: f64) {
        if !self.active {
            return;
        }
        let data = &buffer.data;
        if data.is_empty() {
            self.active = false;
            return;
        }

        let frame_dt = 1.0 / sample_rate;
        for (i, frame) in out.iter_mut().enumerate() {
            let t = block_start + i as f64 * frame_dt;
            if t < self.started_at {
                continue;
            }
            if let Some(stop_at) = self.stop_at {
                if t >= stop_at {
                    self.active = false;
                    break;
                }
            }

            let idx = self.pos as usize;
            if idx >= data.len() {
                // natural end of the buffer
                self.active = false;
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let s0 = data[idx];
            let s1 = data.get(idx + 1).copied().unwrap_or(s0);

            let mut env = 1.0f32;
            if let Some(release_at) = self.release_at {
                if t >= release_at {
                    env = (1.0 - (t - release_at) / self.decay).clamp(0.0, 1.0) as f32;
                }
            }

            let g = self.gain * env;
            frame.left += lerp(s0.left, s1.left, frac) * g;
            frame.right += lerp(s0.right, s1.right, frac) * g;

            self.pos += self.rate;
        }
    }

    #[cfg(test)]
    pub(crate) fn rate(&self) -> f64 {
        self.rate
    }

    #[cfg(test)]
    pub(crate) fn stop_at(&self) -> Option<f64> {
        self.stop_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ids::{next_sample_id, next_voice_id};

    fn ramp_buffer(frames: usize) -> SampleBuffer {
        SampleBuffer {
            data: (0..frames).map(|_| StereoFrame::mono(0.5)).collect(),
        }
    }

    fn test_voice(detune_cents: f64, decay: f64) -> Voice {
        Voice::new(
            next_voice_id(),
            next_sample_id(),
            None,
            1.0,
            detune_cents,
            decay,
            0.0,
        )
    }

    #[test]
    fn detune_sets_playback_rate() {
        assert!((test_voice(0.0, 0.2).rate() - 1.0).abs() < 1e-12);
        assert!((test_voice(1200.0, 0.2).rate() - 2.0).abs() < 1e-12);
        assert!((test_voice(-1200.0, 0.2).rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ends_naturally_at_buffer_end() {
        let buffer = ramp_buffer(100);
        let mut voice = test_voice(0.0, 0.2);
        let mut out = vec![StereoFrame::zero(); 256];
        voice.render_into(&buffer, &mut out, 0.0, 44_100.0);
        assert!(!voice.is_active());
        assert!(out[50].left > 0.0);
        assert_eq!(out[150], StereoFrame::zero());
    }

    #[test]
    fn release_is_idempotent() {
        let mut voice = test_voice(0.0, 0.3);
        let first = voice.release(1.0);
        assert!((first - 1.3).abs() < 1e-12);
        // second release must not reschedule
        let second = voice.release(2.0);
        assert_eq!(first, second);
    }

    #[test]
    fn release_ramp_fades_to_silence() {
        let sr = 1000.0;
        let buffer = ramp_buffer(10_000);
        let mut voice = test_voice(0.0, 0.5);
        voice.release(0.0);
        let mut out = vec![StereoFrame::zero(); 1000];
        voice.render_into(&buffer, &mut out, 0.0, sr);
        // ramp starts at full level and decreases monotonically
        assert!((out[0].left - 0.5).abs() < 1e-3);
        assert!(out[250].left < out[0].left);
        assert!(out[499].left < out[250].left);
        // past the ramp the voice is done
        assert!(!voice.is_active());
    }

    #[test]
    fn skips_frames_before_start_time() {
        let buffer = ramp_buffer(10_000);
        let mut voice = Voice::new(
            next_voice_id(),
            next_sample_id(),
            None,
            1.0,
            0.0,
            0.2,
            0.5, // starts half a second in
        );
        let sr = 1000.0;
        let mut out = vec![StereoFrame::zero(); 1000];
        voice.render_into(&buffer, &mut out, 0.0, sr);
        assert_eq!(out[499], StereoFrame::zero());
        assert!(out[500].left > 0.0);
    }
}
