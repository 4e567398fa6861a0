use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use tracing::warn;

use crate::audio_api::{AudioCommand, EngineEvent, TriggerParams};

use super::clock::EngineClock;
use super::frame::StereoFrame;
use super::ids::{BatchId, SampleId};
use super::sample_buffer::SampleBuffer;
use super::voice::Voice;

pub const DEFAULT_MASTER_GAIN: f32 = 0.5;

#[derive(Clone, Debug)]
struct Pending {
    when: f64,
    params: TriggerParams,
}

#[derive(Clone, Copy, Debug)]
struct Sentinel {
    when: f64,
    batch: BatchId,
}

/// The render-side engine: the shared sink every voice mixes into.
///
/// Runs inside the audio callback (or an offline pump). Holds the registered
/// buffers, the active voices, and the queue of triggers scheduled for the
/// future. Owns the rendering clock and advances it per block.
pub struct Engine {
    clock: EngineClock,
    samples: HashMap<SampleId, Arc<SampleBuffer>>,
    voices: Vec<Voice>,
    pending: Vec<Pending>,
    sentinels: Vec<Sentinel>,
    master_gain: f32,
    playing: Arc<AtomicUsize>,
    events: Sender<EngineEvent>,
    analysis: Sender<Vec<StereoFrame>>,
}

impl Engine {
    pub fn new(
        clock: EngineClock,
        playing: Arc<AtomicUsize>,
        events: Sender<EngineEvent>,
        analysis: Sender<Vec<StereoFrame>>,
    ) -> Self {
        Self {
            clock,
            samples: HashMap::new(),
            voices: Vec::new(),
            pending: Vec::new(),
            sentinels: Vec::new(),
            master_gain: DEFAULT_MASTER_GAIN,
            playing,
            events,
            analysis,
        }
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::RegisterSample { id, buffer } => {
                self.samples.insert(id, buffer);
            }
            AudioCommand::Trigger(params) => self.handle_trigger(params),
            AudioCommand::Release { voice, at } => {
                // a voice that already ended naturally is a safe no-op
                if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                    v.release(at);
                }
            }
            AudioCommand::CancelBatch { batch, at } => {
                // never-started triggers just disappear; sounding voices fade
                self.pending.retain(|p| p.params.batch != Some(batch));
                self.sentinels.retain(|s| s.batch != batch);
                for v in &mut self.voices {
                    if v.batch == Some(batch) {
                        v.release(at);
                    }
                }
            }
            AudioCommand::ScheduleSentinel { batch, at } => {
                self.sentinels.push(Sentinel { when: at, batch });
            }
            AudioCommand::RescalePending { origin, ratio } => {
                let now = self.clock.now();
                for p in &mut self.pending {
                    if p.when >= now {
                        p.when = origin + (p.when - origin) * ratio;
                    }
                }
                for s in &mut self.sentinels {
                    if s.when >= now {
                        s.when = origin + (s.when - origin) * ratio;
                    }
                }
                self.pending
                    .sort_by(|a, b| a.when.total_cmp(&b.when));
            }
            AudioCommand::SetMasterGain(gain) => {
                self.master_gain = gain.clamp(0.0, 1.0);
            }
        }
    }

    fn handle_trigger(&mut self, params: TriggerParams) {
        if !self.samples.contains_key(&params.sample) {
            warn!(sample = params.sample.0, "trigger for unregistered sample");
            return;
        }
        match params.when {
            None => self.start_voice(params, self.clock.now()),
            Some(when) => {
                let idx = self
                    .pending
                    .partition_point(|p| p.when <= when);
                self.pending.insert(idx, Pending { when, params });
            }
        }
    }

    fn start_voice(&mut self, params: TriggerParams, started_at: f64) {
        let voice = Voice::new(
            params.voice,
            params.sample,
            params.batch,
            params.gain,
            params.detune_cents,
            params.decay_seconds,
            started_at,
        );
        self.voices.push(voice);
        self.playing.fetch_add(1, Ordering::Relaxed);
    }

    /// Render one block into `out` and advance the clock by its length.
    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        out.fill(StereoFrame::zero());

        let sample_rate = self.clock.sample_rate();
        let block_start = self.clock.now();
        let block_end = block_start + out.len() as f64 / sample_rate;

        // activate everything due inside this block; late triggers play now
        while let Some(first) = self.pending.first() {
            if first.when >= block_end {
                break;
            }
            let pending = self.pending.remove(0);
            let started_at = pending.when.max(block_start);
            self.start_voice(pending.params, started_at);
        }

        for voice in &mut self.voices {
            if let Some(buffer) = self.samples.get(&voice.sample) {
                voice.render_into(buffer, out, block_start, sample_rate);
            }
        }

        // retire ended voices; each decrements the counter exactly once
        let before = self.voices.len();
        self.voices.retain(|v| v.is_active());
        let ended = before - self.voices.len();
        if ended > 0 {
            self.playing.fetch_sub(ended, Ordering::Relaxed);
        }

        for frame in out.iter_mut() {
            frame.left *= self.master_gain;
            frame.right *= self.master_gain;
        }

        // analysis tap for visualization collaborators; drop blocks when the
        // reader falls behind
        if !self.analysis.is_full() {
            let _ = self.analysis.try_send(out.to_vec());
        }

        let mut i = 0;
        while i < self.sentinels.len() {
            if self.sentinels[i].when < block_end {
                let s = self.sentinels.remove(i);
                let _ = self.events.try_send(EngineEvent::SentinelFired {
                    batch: s.batch,
                    at: s.when,
                });
            } else {
                i += 1;
            }
        }

        self.clock.advance(out.len() as u64);
    }

    #[cfg(test)]
    pub(crate) fn pending_times(&self) -> Vec<f64> {
        self.pending.iter().map(|p| p.when).collect()
    }

    #[cfg(test)]
    pub(crate) fn voices(&self) -> &[Voice] {
        &self.voices
    }
}
