//! Schedule-ahead playback of a `Sequence` against the rendering clock.
//!
//! Everything is committed to the engine at `play()` time as absolute
//! timestamps, so a stalled control thread can delay edits but never smear
//! the timing of what is already queued. Looping hangs off a sentinel event
//! scheduled one measure past the last beat, which keeps the restart anchored
//! to the grid instead of to wall-clock elapsed time.

use thiserror::Error;
use tracing::debug;

use crate::audio::{BatchId, EngineLink, next_batch_id};
use crate::audio_api::{AudioCommand, EngineEvent};
use crate::player::{Player, StartOpts};
use crate::sequence::Sequence;

/// Grid resolution of one loop.
pub const BEATS_PER_LOOP: u32 = 32;

pub const DEFAULT_TEMPO_BPM: f64 = 60.0;
pub const DEFAULT_TIME_SIG_DENOM: u32 = 4;

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("cannot change the time signature while playing")]
    Playing,
}

pub struct BeatScheduler {
    link: EngineLink,
    tempo_bpm: f64,
    time_sig_denom: u32,
    loop_enabled: bool,
    total_beats: u32,
    start_time: f64,
    playing: bool,
    batch: Option<BatchId>,
}

impl BeatScheduler {
    pub fn new(link: EngineLink) -> Self {
        Self {
            link,
            tempo_bpm: DEFAULT_TEMPO_BPM,
            time_sig_denom: DEFAULT_TIME_SIG_DENOM,
            loop_enabled: false,
            total_beats: BEATS_PER_LOOP,
            start_time: 0.0,
            playing: false,
            batch: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    /// Absolute rendering-clock time of a beat for the current origin.
    pub fn beat_time(&self, beat: u32) -> f64 {
        self.start_time + beat as f64 * 60.0 / self.tempo_bpm / self.time_sig_denom as f64
    }

    /// Start playback: anchor the origin at "now" and hand the whole pattern
    /// to the engine up front.
    pub fn play(&mut self, player: &Player, sequence: &Sequence) {
        self.play_from(self.link.now(), player, sequence);
    }

    fn play_from(&mut self, origin: f64, player: &Player, sequence: &Sequence) {
        self.start_time = origin;
        let batch = next_batch_id();
        self.batch = Some(batch);

        // the sequence is sorted, so the engine sees nondecreasing times
        for item in sequence.iter() {
            player.start_at(
                &item.note,
                self.beat_time(item.beat),
                batch,
                &StartOpts::default(),
            );
        }
        // end-of-measure sentinel: fires the completion that either loops or
        // stops, one beat past the grid
        self.link.send(AudioCommand::ScheduleSentinel {
            batch,
            at: self.beat_time(self.total_beats),
        });
        self.playing = true;
        debug!(origin, batch = batch.0, events = sequence.size(), "scheduled pattern");
    }

    /// Stop immediately: pending triggers vanish, sounding voices fade now.
    pub fn stop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.link.send(AudioCommand::CancelBatch {
                batch,
                at: self.link.now(),
            });
        }
        self.playing = false;
    }

    /// Live tempo change. Every not-yet-fired event keeps its beat position:
    /// its remaining offset from the origin scales by old/new. Events whose
    /// time already passed are left alone.
    pub fn set_tempo(&mut self, tempo_bpm: f64) {
        if self.playing && tempo_bpm != self.tempo_bpm {
            self.link.send(AudioCommand::RescalePending {
                origin: self.start_time,
                ratio: self.tempo_bpm / tempo_bpm,
            });
        }
        self.tempo_bpm = tempo_bpm;
    }

    /// Disallowed while playing: rescaling for a denominator change on top of
    /// already-scheduled events is undefined territory, so we refuse it.
    pub fn set_time_sig_denominator(&mut self, denom: u32) -> Result<(), SchedulerError> {
        if self.playing {
            return Err(SchedulerError::Playing);
        }
        self.time_sig_denom = denom.max(1);
        Ok(())
    }

    /// Feed engine events back in. On our sentinel: re-arm from the
    /// sentinel's own timestamp when looping (sample-accurate relative to the
    /// last scheduled beat), otherwise fall back to stopped.
    pub fn handle_event(&mut self, event: EngineEvent, player: &Player, sequence: &Sequence) {
        let EngineEvent::SentinelFired { batch, at } = event;
        if self.batch != Some(batch) {
            return; // stale sentinel from a run we already cancelled
        }
        if self.loop_enabled {
            self.play_from(at, player, sequence);
        } else {
            self.playing = false;
            self.batch = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::offline::{OfflineAudio, sine_wav_bytes};
    use crate::player::tests::{MapFetcher, player_with};
    use crate::sequence::SequenceNote;

    fn kit_player(audio: &OfflineAudio) -> Player {
        let mut fetcher = MapFetcher::new();
        fetcher.insert("kick.wav", sine_wav_bytes(44_100, 0.05, 220.0));
        fetcher.insert("snare.wav", sine_wav_bytes(44_100, 0.05, 880.0));
        let mut player = player_with(audio, fetcher);
        player.load_url("kick", "kick.wav").unwrap();
        player.load_url("snare", "snare.wav").unwrap();
        player
    }

    fn basic_sequence() -> Sequence {
        let mut seq = Sequence::new();
        for beat in [0u32, 4, 8] {
            seq.push(SequenceNote {
                note: "kick".to_string(),
                beat,
            });
        }
        seq
    }

    #[test]
    fn beat_time_follows_tempo_and_denominator() {
        let audio = OfflineAudio::new(44_100);
        let mut scheduler = BeatScheduler::new(audio.link());
        // 60 bpm, denominator 4: one beat = 0.25s
        assert_eq!(scheduler.beat_time(0), 0.0);
        assert_eq!(scheduler.beat_time(4), 1.0);
        scheduler.set_time_sig_denominator(2).unwrap();
        assert_eq!(scheduler.beat_time(4), 2.0);
    }

    #[test]
    fn play_schedules_every_event_and_the_sentinel() {
        let mut audio = OfflineAudio::new(44_100);
        let player = kit_player(&audio);
        let seq = basic_sequence();
        let mut scheduler = BeatScheduler::new(audio.link());

        scheduler.play(&player, &seq);
        audio.pump();
        assert_eq!(audio.engine().pending_times(), vec![0.0, 1.0, 2.0]);

        // render past the whole measure: sentinel at beat 32 → 8.0s
        audio.render(8.1);
        let event = audio.poll_event().unwrap();
        scheduler.handle_event(event, &player, &seq);
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn tempo_change_rescales_only_whats_left() {
        let mut audio = OfflineAudio::new(44_100);
        let player = kit_player(&audio);
        let seq = basic_sequence();
        let mut scheduler = BeatScheduler::new(audio.link());

        scheduler.play(&player, &seq);
        audio.render(0.5); // beat 0 has fired

        scheduler.set_tempo(120.0);
        audio.pump();
        // beats 4 and 8 were due at 1.0 and 2.0; doubling the tempo halves
        // their offsets, order preserved
        assert_eq!(audio.engine().pending_times(), vec![0.5, 1.0]);
        // new events keep scheduling on the rescaled grid
        assert_eq!(scheduler.beat_time(4), 0.5);
    }

    #[test]
    fn looping_rearms_from_the_sentinel_timestamp() {
        let mut audio = OfflineAudio::new(44_100);
        let player = kit_player(&audio);
        let seq = basic_sequence();
        let mut scheduler = BeatScheduler::new(audio.link());
        scheduler.set_loop(true);

        scheduler.play(&player, &seq);
        audio.render(8.2); // sentinel fired at exactly 8.0
        let event = audio.poll_event().unwrap();
        scheduler.handle_event(event, &player, &seq);

        assert!(scheduler.is_playing());
        // origin is the sentinel's time, not the (later) polling time
        assert_eq!(scheduler.start_time(), 8.0);
        audio.pump();
        assert_eq!(audio.engine().pending_times(), vec![8.0, 9.0, 10.0]);
    }

    #[test]
    fn stop_cancels_pending_and_ignores_stale_sentinel() {
        let mut audio = OfflineAudio::new(44_100);
        let player = kit_player(&audio);
        let seq = basic_sequence();
        let mut scheduler = BeatScheduler::new(audio.link());
        scheduler.set_loop(true);

        scheduler.play(&player, &seq);
        audio.render(0.1);
        scheduler.stop();
        audio.pump();
        assert!(audio.engine().pending_times().is_empty());
        assert!(!scheduler.is_playing());

        // a sentinel from the cancelled run must not restart playback
        let stale = EngineEvent::SentinelFired {
            batch: crate::audio::next_batch_id(),
            at: 8.0,
        };
        scheduler.handle_event(stale, &player, &seq);
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn denominator_changes_are_refused_while_playing() {
        let mut audio = OfflineAudio::new(44_100);
        let player = kit_player(&audio);
        let seq = basic_sequence();
        let mut scheduler = BeatScheduler::new(audio.link());

        scheduler.play(&player, &seq);
        assert_eq!(
            scheduler.set_time_sig_denominator(8),
            Err(SchedulerError::Playing)
        );
        scheduler.stop();
        assert!(scheduler.set_time_sig_denominator(8).is_ok());
        let _ = audio.render(0.01);
    }
}
