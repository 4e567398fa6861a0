use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crossbeam_channel::Receiver;

use crate::audio_api::{AudioCommand, EngineEvent};

use super::clock::EngineClock;
use super::engine::Engine;
use super::frame::StereoFrame;
use super::{ANALYSIS_QUEUE, COMMAND_QUEUE, EVENT_QUEUE, EngineLink};

const BLOCK_FRAMES: usize = 256;

/// An engine without a device: commands in, rendered frames out, clock
/// advanced by rendering instead of by a callback. This is what makes
/// multiple independent engine instances possible (tests, bouncing).
pub struct OfflineAudio {
    engine: Engine,
    rx: Receiver<AudioCommand>,
    events: Receiver<EngineEvent>,
    analysis: Receiver<Vec<StereoFrame>>,
    link: EngineLink,
    sample_rate: u32,
}

impl OfflineAudio {
    pub fn new(sample_rate: u32) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
        let (event_tx, event_rx) = crossbeam_channel::bounded::<EngineEvent>(EVENT_QUEUE);
        let (analysis_tx, analysis_rx) =
            crossbeam_channel::bounded::<Vec<StereoFrame>>(ANALYSIS_QUEUE);

        let clock = EngineClock::new(sample_rate);
        let playing = Arc::new(AtomicUsize::new(0));
        let link = EngineLink {
            tx,
            clock: clock.clone(),
            playing: playing.clone(),
        };
        let engine = Engine::new(clock, playing, event_tx, analysis_tx);

        Self {
            engine,
            rx,
            events: event_rx,
            analysis: analysis_rx,
            link,
            sample_rate,
        }
    }

    pub fn link(&self) -> EngineLink {
        self.link.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Apply every command the control side has sent so far.
    pub fn pump(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.engine.handle_cmd(cmd);
        }
    }

    /// Render `seconds` of audio, pumping commands before each block, and
    /// return the rendered frames.
    pub fn render(&mut self, seconds: f64) -> Vec<StereoFrame> {
        let total = (seconds * self.sample_rate as f64).round() as usize;
        let mut out = Vec::with_capacity(total);
        let mut block = [StereoFrame::zero(); BLOCK_FRAMES];
        let mut rendered = 0;
        while rendered < total {
            self.pump();
            let n = BLOCK_FRAMES.min(total - rendered);
            let chunk = &mut block[..n];
            self.engine.render_block(chunk);
            out.extend_from_slice(chunk);
            // drain the tap so the engine never stalls on a full queue
            while self.analysis.try_recv().is_ok() {}
            rendered += n;
        }
        out
    }

    pub fn poll_event(&self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// In-memory WAV fixture: a sine at `freq`, amplitude 0.8.
#[cfg(test)]
pub(crate) fn sine_wav_bytes(sample_rate: u32, seconds: f64, freq: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f64).round() as usize;
        for i in 0..frames {
            let t = i as f64 / sample_rate as f64;
            let s = (t * freq * std::f64::consts::TAU).sin() * 0.8;
            writer.write_sample((s * i16::MAX as f64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ids::{next_batch_id, next_sample_id, next_voice_id};
    use crate::audio::sample_buffer::SampleBuffer;
    use crate::audio_api::TriggerParams;

    fn register_tone(audio: &OfflineAudio) -> crate::audio::SampleId {
        let id = next_sample_id();
        let buffer = SampleBuffer {
            data: vec![StereoFrame::mono(0.5); audio.sample_rate() as usize],
        };
        audio.link().send(AudioCommand::RegisterSample {
            id,
            buffer: Arc::new(buffer),
        });
        id
    }

    fn trigger(sample: crate::audio::SampleId, when: Option<f64>) -> TriggerParams {
        TriggerParams {
            sample,
            voice: next_voice_id(),
            gain: 1.0,
            detune_cents: 0.0,
            decay_seconds: 0.2,
            when,
            batch: None,
        }
    }

    #[test]
    fn immediate_trigger_is_audible_and_counted() {
        let mut audio = OfflineAudio::new(44_100);
        let sample = register_tone(&audio);
        audio.link().send(AudioCommand::Trigger(trigger(sample, None)));

        let out = audio.render(0.1);
        assert!(out.iter().any(|f| f.peak() > 0.0));
        assert_eq!(audio.link().playing_count(), 1);

        // the buffer is 1s long; after it runs out the counter drops
        audio.render(1.1);
        assert_eq!(audio.link().playing_count(), 0);
    }

    #[test]
    fn scheduled_trigger_starts_at_its_timestamp() {
        let mut audio = OfflineAudio::new(44_100);
        let sample = register_tone(&audio);
        audio
            .link()
            .send(AudioCommand::Trigger(trigger(sample, Some(0.5))));

        let out = audio.render(1.0);
        let start_frame = (0.5 * 44_100.0) as usize;
        assert!(out[..start_frame - 1].iter().all(|f| f.peak() == 0.0));
        assert!(out[start_frame..start_frame + 256].iter().any(|f| f.peak() > 0.0));
    }

    #[test]
    fn rescale_moves_future_events_only() {
        let mut audio = OfflineAudio::new(44_100);
        let sample = register_tone(&audio);
        let link = audio.link();
        for when in [1.0, 2.0, 3.0] {
            link.send(AudioCommand::Trigger(trigger(sample, Some(when))));
        }
        audio.pump();

        link.send(AudioCommand::RescalePending {
            origin: 0.0,
            ratio: 0.5,
        });
        audio.pump();
        assert_eq!(audio.engine().pending_times(), vec![0.5, 1.0, 1.5]);

        // advance past the first event, then rescale back; the two still
        // pending move, the fired one is gone and unaffected
        audio.render(0.75);
        link.send(AudioCommand::RescalePending {
            origin: 0.0,
            ratio: 2.0,
        });
        audio.pump();
        assert_eq!(audio.engine().pending_times(), vec![2.0, 3.0]);
        assert_eq!(audio.engine().voices().len(), 1);
    }

    #[test]
    fn sentinel_fires_at_its_time() {
        let mut audio = OfflineAudio::new(44_100);
        let batch = next_batch_id();
        audio
            .link()
            .send(AudioCommand::ScheduleSentinel { batch, at: 0.25 });

        audio.render(0.2);
        assert_eq!(audio.poll_event(), None);

        audio.render(0.1);
        assert_eq!(
            audio.poll_event(),
            Some(EngineEvent::SentinelFired { batch, at: 0.25 })
        );
    }

    #[test]
    fn cancel_batch_clears_pending_and_releases_sounding() {
        let mut audio = OfflineAudio::new(44_100);
        let sample = register_tone(&audio);
        let batch = next_batch_id();
        let link = audio.link();

        let mut immediate = trigger(sample, None);
        immediate.batch = Some(batch);
        link.send(AudioCommand::Trigger(immediate));
        let mut future = trigger(sample, Some(5.0));
        future.batch = Some(batch);
        link.send(AudioCommand::Trigger(future));
        audio.render(0.05);
        assert_eq!(link.playing_count(), 1);

        link.send(AudioCommand::CancelBatch {
            batch,
            at: link.now(),
        });
        audio.pump();
        assert!(audio.engine().pending_times().is_empty());

        // the sounding voice fades out over its decay and retires
        audio.render(0.3);
        assert_eq!(link.playing_count(), 0);
    }

    #[test]
    fn release_after_natural_end_is_a_noop() {
        let mut audio = OfflineAudio::new(44_100);
        let sample = register_tone(&audio);
        let params = trigger(sample, None);
        let voice = params.voice;
        audio.link().send(AudioCommand::Trigger(params));
        audio.render(1.5); // buffer is 1s, voice long gone

        audio.link().send(AudioCommand::Release {
            voice,
            at: audio.link().now(),
        });
        audio.pump();
        assert_eq!(audio.link().playing_count(), 0);
    }
}
