//! A sample-based instrument playback and beat-scheduling engine.
//!
//! Samples are fetched, decoded, and cached by logical name; a pitch/layer
//! resolver detunes the best-matching sample to realize arbitrary notes; and
//! a schedule-ahead sequencer commits whole patterns to the rendering clock
//! so control-thread jitter never reaches the audio output.

pub mod audio;
pub mod audio_api;
pub mod instrument;
pub mod note;
pub mod pitched;
pub mod player;
pub mod scheduler;
pub mod sequence;

pub use audio::{AudioHandle, EngineLink, SampleBuffer, StereoFrame, start_audio};
pub use audio::offline::OfflineAudio;
pub use audio_api::{AudioCommand, EngineEvent};
pub use pitched::{NoteUrl, NoteUrlGain, PitchedPlayer};
pub use player::{Fetcher, FsFetcher, LoadError, LoadState, Player, StartOpts, StopHandle};
pub use scheduler::{BeatScheduler, SchedulerError};
pub use sequence::{Sequence, SequenceNote};
