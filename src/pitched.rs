//! The pitch/layer resolver: maps an arbitrary requested frequency and
//! loudness onto the closest sampled (layer, pitch) pair and detunes the
//! sample to hit the requested frequency exactly.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::note::{midi_to_freq, midi_vel_to_gain, note_to_freq};
use crate::player::{LoadError, Player, StartOpts, StopHandle};

/// One sampled pitch inside a layer.
#[derive(Clone, Debug)]
pub struct NoteUrl {
    pub freq: f64,
    pub url: String,
}

/// One sampled pitch with its own loudness layer key.
#[derive(Clone, Debug)]
pub struct NoteUrlGain {
    pub freq: f64,
    pub url: String,
    pub gain: f64,
}

fn sample_name(layer: f64, freq: f64) -> String {
    format!("{layer}-{freq}")
}

/// Pitch correction, in cents, to play `nearest` at `freq`. Sign follows the
/// ratio: positive when the request is sharper than the sample.
pub(crate) fn detune_cents(freq: f64, nearest: f64) -> f64 {
    1200.0 * (freq / nearest).log2()
}

/// Nearest entry by absolute key distance. `entries` is sorted by key; on an
/// exact midpoint the lower key wins, so the policy is stable no matter how
/// the table was built.
fn closest<T>(entries: &[(f64, T)], target: f64) -> &(f64, T) {
    assert!(!entries.is_empty(), "closest() on an empty table");
    let idx = entries.partition_point(|(key, _)| *key < target);
    if idx == 0 {
        return &entries[0];
    }
    if idx == entries.len() {
        return &entries[entries.len() - 1];
    }
    let below = &entries[idx - 1];
    let above = &entries[idx];
    if target - below.0 <= above.0 - target {
        below
    } else {
        above
    }
}

fn insert_sorted<T>(entries: &mut Vec<(f64, T)>, key: f64, value: T) {
    match entries.binary_search_by(|(k, _)| k.total_cmp(&key)) {
        Ok(idx) => entries[idx].1 = value,
        Err(idx) => entries.insert(idx, (key, value)),
    }
}

/// Will detune the nearest sample to realize notes that were never recorded.
///
/// Layer keys and frequencies live in sorted association lists, so lookup is
/// a binary search and the tie-break is explicit rather than an accident of
/// map iteration order.
pub struct PitchedPlayer {
    player: Player,
    layers: Vec<(f64, Vec<(f64, String)>)>,
    playing: HashMap<u64, Vec<Rc<StopHandle>>>,
}

impl PitchedPlayer {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            layers: Vec::new(),
            playing: HashMap::new(),
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    /// Load every sample of one loudness layer. Load failures are isolated:
    /// remaining samples still load, the first error is reported at the end.
    pub fn load_layer(&mut self, notes: &[NoteUrl], layer_key: f64) -> Result<(), LoadError> {
        let mut first_err = None;
        for note in notes {
            let name = sample_name(layer_key, note.freq);
            if let Err(err) = self.player.load_url(&name, &note.url) {
                first_err.get_or_insert(err);
            }
            self.record(layer_key, note.freq, name);
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Load samples that carry their own layer key.
    pub fn load_layers(&mut self, notes: &[NoteUrlGain]) -> Result<(), LoadError> {
        let mut first_err = None;
        for note in notes {
            let name = sample_name(note.gain, note.freq);
            if let Err(err) = self.player.load_url(&name, &note.url) {
                first_err.get_or_insert(err);
            }
            self.record(note.gain, note.freq, name);
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn record(&mut self, layer_key: f64, freq: f64, name: String) {
        let table = match self
            .layers
            .binary_search_by(|(k, _)| k.total_cmp(&layer_key))
        {
            Ok(idx) => &mut self.layers[idx].1,
            Err(idx) => {
                self.layers.insert(idx, (layer_key, Vec::new()));
                &mut self.layers[idx].1
            }
        };
        insert_sorted(table, freq, name);
    }

    /// Play an arbitrary frequency at `gain` by detuning the best-matching
    /// sample. Panics if no layer has been loaded: playing an uninitialized
    /// instrument is a programming error, not a runtime condition.
    pub fn play_freq(&mut self, freq: f64, gain: f32) -> Option<Rc<StopHandle>> {
        self.play_freq_with_decay(freq, gain, crate::player::DEFAULT_DECAY_SECONDS)
    }

    pub fn play_freq_with_decay(
        &mut self,
        freq: f64,
        gain: f32,
        decay_seconds: f64,
    ) -> Option<Rc<StopHandle>> {
        assert!(
            !self.layers.is_empty(),
            "play_freq before any layer was loaded"
        );
        let (layer, table) = closest(&self.layers, gain as f64);
        let (nearest, name) = closest(table, freq);
        let cents = detune_cents(freq, *nearest);
        debug!(freq, layer, nearest, cents, gain, "resolved pitch");

        let handle = self.player.start(
            name,
            &StartOpts {
                gain,
                detune_cents: cents,
                decay_seconds,
            },
        )?;
        let handle = Rc::new(handle);
        self.playing
            .entry(freq.to_bits())
            .or_default()
            .push(handle.clone());
        Some(handle)
    }

    /// Stop every voice started for this exact requested frequency. Handles
    /// are invoked once each and the list is cleared, so overlapping triggers
    /// of the same note release independently and nothing is stopped twice.
    pub fn stop_freq(&mut self, freq: f64) {
        if let Some(handles) = self.playing.remove(&freq.to_bits()) {
            for handle in handles {
                handle.stop();
            }
        }
    }

    /// Note-name adapter: velocity through the quadratic MIDI curve.
    pub fn play_note(&mut self, note: &str, velocity: u8) -> Option<Rc<StopHandle>> {
        let Some(freq) = note_to_freq(note) else {
            warn!(note, "could not parse frequency for note");
            return None;
        };
        self.play_freq(freq, midi_vel_to_gain(velocity))
    }

    pub fn stop_note(&mut self, note: &str) {
        let Some(freq) = note_to_freq(note) else {
            warn!(note, "could not parse frequency for note");
            return;
        };
        self.stop_freq(freq);
    }

    /// MIDI-pitch entry points for the input collaborator.
    pub fn note_on(&mut self, pitch: u8, velocity: u8) -> Option<Rc<StopHandle>> {
        self.play_freq(midi_to_freq(pitch), midi_vel_to_gain(velocity))
    }

    pub fn note_off(&mut self, pitch: u8) {
        self.stop_freq(midi_to_freq(pitch));
    }

    #[cfg(test)]
    pub(crate) fn playing_len(&self, freq: f64) -> usize {
        self.playing
            .get(&freq.to_bits())
            .map(Vec::len)
            .unwrap_or(0)
    }
}
