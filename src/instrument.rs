//! Instrument construction from the sample catalog: the index document,
//! the URL addressing convention, and the filename conventions that turn a
//! flat file list into kit pieces or loudness layers.

use std::collections::BTreeMap;

use tracing::warn;

use crate::note::{Dynamic, note_to_freq};
use crate::pitched::{NoteUrl, PitchedPlayer};
use crate::player::{LoadError, Player};

/// The instrument index document: category → instrument → sample files.
pub type InstrumentIndex = BTreeMap<String, BTreeMap<String, Vec<String>>>;

pub fn parse_index(json: &str) -> Result<InstrumentIndex, serde_json::Error> {
    serde_json::from_str(json)
}

/// `{base}/{category}/{instrument}/{file}`
pub fn sample_url(base: &str, category: &str, instrument: &str, file: &str) -> String {
    format!("{}/{category}/{instrument}/{file}", base.trim_end_matches('/'))
}

fn stem(file: &str) -> &str {
    file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file)
}

/// Kit pieces grouped with their variations, e.g. `snare`, `snare-2`,
/// `hat-open`, `hat-open-3`. Used by soundboard/sequencer collaborators to
/// present one button per piece.
pub type Variations = BTreeMap<String, Vec<String>>;

/// Group percussion file stems into kit pieces: `name[-adjective][-variation]`
/// where a digits-only second part is a variation of the bare piece.
pub fn kit_pieces(files: &[String]) -> Variations {
    let mut variations = Variations::new();
    for file in files {
        let stem = stem(file);
        let parts: Vec<&str> = stem.split('-').collect();
        let (key, variation) = match parts.as_slice() {
            [name] => (name.to_string(), None),
            [name, second] if second.chars().all(|c| c.is_ascii_digit()) => {
                (name.to_string(), Some(*second))
            }
            [name, adjective, rest @ ..] => {
                let key = format!("{name}-{adjective}");
                (key, rest.first().copied())
            }
            [] => continue,
        };
        let entry = match variation {
            Some(v) => format!("{key}-{v}"),
            None => key.clone(),
        };
        variations.entry(key).or_default().push(entry);
    }
    variations
}

/// Load a percussion kit: each file becomes a sample named by its stem.
/// Returns the kit grouping. Load failures are isolated per sample.
pub fn load_drum_kit(
    player: &mut Player,
    base_url: &str,
    category: &str,
    instrument: &str,
    files: &[String],
) -> Variations {
    for file in files {
        let url = sample_url(base_url, category, instrument, file);
        // errors are already recorded per sample; nothing else to do here
        let _ = player.load_url(stem(file), &url);
    }
    kit_pieces(files)
}

/// A pitched file stem: `{dynamic}-{note}` for layered instruments, or a
/// bare `{note}` which lands in the default layer (key 0).
fn parse_pitched_stem(stem: &str) -> Option<(f64, f64)> {
    if let Some((prefix, note)) = stem.split_once('-') {
        if let (Some(dynamic), Some(freq)) = (Dynamic::parse(prefix), note_to_freq(note)) {
            return Some((dynamic.to_gain() as f64, freq));
        }
    }
    note_to_freq(stem).map(|freq| (0.0, freq))
}

/// Load a pitched instrument's files into loudness layers.
pub fn load_pitched(
    pitched: &mut PitchedPlayer,
    base_url: &str,
    category: &str,
    instrument: &str,
    files: &[String],
) -> Result<(), LoadError> {
    let mut layers: BTreeMap<u64, Vec<NoteUrl>> = BTreeMap::new();
    for file in files {
        let Some((layer, freq)) = parse_pitched_stem(stem(file)) else {
            warn!(file = %file, "skipping file with unrecognized pitched name");
            continue;
        };
        layers.entry(layer.to_bits()).or_default().push(NoteUrl {
            freq,
            url: sample_url(base_url, category, instrument, file),
        });
    }

    let mut first_err = None;
    for (layer_bits, notes) in layers {
        if let Err(err) = pitched.load_layer(&notes, f64::from_bits(layer_bits)) {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
