//! Note-name and loudness conversions: names to MIDI numbers to frequencies,
//! and the MIDI velocity curve used everywhere a gain is derived.

/// `gain = vel^2 / 127^2`, the DLS level 1 velocity curve.
pub fn midi_vel_to_gain(vel: u8) -> f32 {
    let v = vel.min(127) as f32;
    (v * v) / 16129.0
}

/// Equal-tempered frequency of a MIDI note number (A4 = 69 = 440 Hz).
pub fn midi_to_freq(midi: u8) -> f64 {
    440.0 * ((midi as f64 - 69.0) / 12.0).exp2()
}

/// Parse a note name like "C4", "F#3", "Bb-1" to its MIDI number.
/// Octave -1 maps C-1 to 0; anything outside 0..=127 is rejected.
pub fn note_to_midi(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest: String = chars.collect();
    let mut accidental = 0i32;
    let mut idx = 0;
    for c in rest.chars() {
        match c {
            '#' => accidental += 1,
            'b' => accidental -= 1,
            _ => break,
        }
        idx += c.len_utf8();
    }
    let octave: i32 = rest[idx..].parse().ok()?;

    let midi = (octave + 1) * 12 + base + accidental;
    u8::try_from(midi).ok().filter(|&m| m <= 127)
}

/// Frequency for a note name, if it parses.
pub fn note_to_freq(name: &str) -> Option<f64> {
    note_to_midi(name).map(midi_to_freq)
}

/// Named dynamic levels, quietest to loudest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dynamic {
    Ppppp,
    Pppp,
    Ppp,
    Pp,
    P,
    Mp,
    Mf,
    F,
    Ff,
    Fff,
    Ffff,
}

impl Dynamic {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ppppp" => Dynamic::Ppppp,
            "pppp" => Dynamic::Pppp,
            "ppp" => Dynamic::Ppp,
            "pp" => Dynamic::Pp,
            "p" => Dynamic::P,
            "mp" => Dynamic::Mp,
            "mf" => Dynamic::Mf,
            "f" => Dynamic::F,
            "ff" => Dynamic::Ff,
            "fff" => Dynamic::Fff,
            "ffff" => Dynamic::Ffff,
            _ => return None,
        })
    }

    /// Velocity anchor per dynamic (MuseScore 3.0's table), through the
    /// same quadratic curve as live velocities.
    pub fn to_gain(self) -> f32 {
        let vel: u8 = match self {
            Dynamic::Ppppp => 5,
            Dynamic::Pppp => 10,
            Dynamic::Ppp => 16,
            Dynamic::Pp => 33,
            Dynamic::P => 49,
            Dynamic::Mp => 64,
            Dynamic::Mf => 80,
            Dynamic::F => 96,
            Dynamic::Ff => 112,
            Dynamic::Fff => 126,
            Dynamic::Ffff => 127,
        };
        midi_vel_to_gain(vel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_curve_boundaries() {
        assert_eq!(midi_vel_to_gain(0), 0.0);
        assert!((midi_vel_to_gain(127) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn velocity_curve_is_monotonic() {
        let mut last = -1.0f32;
        for vel in 0..=127u8 {
            let gain = midi_vel_to_gain(vel);
            assert!(gain >= last, "gain({vel}) decreased");
            last = gain;
        }
    }

    #[test]
    fn note_names_parse() {
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("C#4"), Some(61));
        assert_eq!(note_to_midi("Db4"), Some(61));
        assert_eq!(note_to_midi("C-1"), Some(0));
        assert_eq!(note_to_midi("G9"), Some(127));
        assert_eq!(note_to_midi("A9"), None); // 129, out of range
        assert_eq!(note_to_midi("H2"), None);
        assert_eq!(note_to_midi(""), None);
        assert_eq!(note_to_midi("C"), None);
    }

    #[test]
    fn frequencies_match_equal_temperament() {
        assert!((note_to_freq("A4").unwrap() - 440.0).abs() < 1e-9);
        assert!((note_to_freq("A3").unwrap() - 220.0).abs() < 1e-9);
        assert!((note_to_freq("C4").unwrap() - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn dynamics_are_ordered() {
        let order = [
            Dynamic::Ppppp,
            Dynamic::Pppp,
            Dynamic::Ppp,
            Dynamic::Pp,
            Dynamic::P,
            Dynamic::Mp,
            Dynamic::Mf,
            Dynamic::F,
            Dynamic::Ff,
            Dynamic::Fff,
            Dynamic::Ffff,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].to_gain() < pair[1].to_gain());
        }
        assert_eq!(Dynamic::parse("mf"), Some(Dynamic::Mf));
        assert_eq!(Dynamic::parse("sfz"), None);
    }
}
