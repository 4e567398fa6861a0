//! The sample store and voice player: loads/decodes/caches samples by
//! logical name, and turns cached buffers into transient voices on the
//! engine.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::{BatchId, EngineLink, SampleBuffer, SampleId, VoiceId, next_voice_id};
use crate::audio_api::{AudioCommand, TriggerParams};

pub const DEFAULT_DECAY_SECONDS: f64 = 0.5;

/// Fetches raw audio bytes for a URL. The store does not care where the
/// bytes come from; the stock implementation reads the filesystem.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> std::io::Result<Vec<u8>>;
}

/// Resolves URLs against a base directory. Absolute paths and `file://`
/// URLs bypass the base.
pub struct FsFetcher {
    base: PathBuf,
}

impl FsFetcher {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Fetcher for FsFetcher {
    fn fetch(&self, url: &str) -> std::io::Result<Vec<u8>> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = PathBuf::from(path);
        let path = if path.is_absolute() {
            path
        } else {
            self.base.join(path)
        };
        std::fs::read(path)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: SymphoniaError,
    },
}

/// Per-sample load state. Terminal states are never retried automatically;
/// a retry is a fresh `load_url` after the entry is dropped.
#[derive(Clone, Debug)]
pub enum LoadState {
    Loading,
    Ready(SampleId),
    Failed,
}

pub struct Sample {
    pub url: String,
    pub state: LoadState,
    pub buffer: Option<Arc<SampleBuffer>>,
}

#[derive(Clone, Copy, Debug)]
pub struct StartOpts {
    pub gain: f32,
    pub detune_cents: f64,
    pub decay_seconds: f64,
}

impl Default for StartOpts {
    fn default() -> Self {
        Self {
            gain: 1.0,
            detune_cents: 0.0,
            decay_seconds: DEFAULT_DECAY_SECONDS,
        }
    }
}

type LoadObserver = Box<dyn Fn(&str, &LoadState)>;

pub struct Player {
    link: EngineLink,
    sample_rate: u32,
    fetcher: Box<dyn Fetcher>,
    samples: HashMap<String, Sample>,
    observers: Vec<LoadObserver>,
}

impl Player {
    pub fn new(link: EngineLink, sample_rate: u32, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            link,
            sample_rate,
            fetcher,
            samples: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn link(&self) -> &EngineLink {
        &self.link
    }

    /// Fetch, decode, and register a sample under `name`. Idempotent: if the
    /// name is already present (loading, loaded, or failed) this is a no-op,
    /// because layer tables may alias the same file under several names and
    /// instrument construction can run more than once.
    pub fn load_url(&mut self, name: &str, url: &str) -> Result<(), LoadError> {
        if self.samples.contains_key(name) {
            return Ok(());
        }
        self.samples.insert(
            name.to_string(),
            Sample {
                url: url.to_string(),
                state: LoadState::Loading,
                buffer: None,
            },
        );

        let result = self.fetch_and_decode(url);
        match result {
            Ok(buffer) => {
                let id = crate::audio::next_sample_id();
                let buffer = Arc::new(buffer);
                self.link.send(AudioCommand::RegisterSample {
                    id,
                    buffer: buffer.clone(),
                });
                let sample = self.samples.get_mut(name).expect("just inserted");
                sample.state = LoadState::Ready(id);
                sample.buffer = Some(buffer);
                self.notify(name);
                Ok(())
            }
            Err(err) => {
                // terminal per-sample failure; the rest of the instrument
                // stays usable
                warn!(name, url, error = %err, "sample load failed");
                let sample = self.samples.get_mut(name).expect("just inserted");
                sample.state = LoadState::Failed;
                self.notify(name);
                Err(err)
            }
        }
    }

    fn fetch_and_decode(&self, url: &str) -> Result<SampleBuffer, LoadError> {
        let bytes = self.fetcher.fetch(url).map_err(|source| LoadError::Fetch {
            url: url.to_string(),
            source,
        })?;
        let extension = url.rsplit('.').next().filter(|ext| ext.len() <= 4);
        SampleBuffer::decode(bytes, extension, self.sample_rate).map_err(|source| {
            LoadError::Decode {
                url: url.to_string(),
                source,
            }
        })
    }

    fn notify(&self, name: &str) {
        if let Some(sample) = self.samples.get(name) {
            for observer in &self.observers {
                observer(name, &sample.state);
            }
        }
    }

    /// Register a callback invoked whenever a sample reaches a terminal
    /// state, so dependent collaborators can react without polling.
    pub fn on_loaded(&mut self, observer: impl Fn(&str, &LoadState) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn sample(&self, name: &str) -> Option<&Sample> {
        self.samples.get(name)
    }

    pub fn sample_id(&self, name: &str) -> Option<SampleId> {
        match self.samples.get(name)?.state {
            LoadState::Ready(id) => Some(id),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    /// Start a voice for a loaded sample now. Unknown or unready samples are
    /// non-fatal: log and return `None` ("nothing to stop").
    pub fn start(&self, name: &str, opts: &StartOpts) -> Option<StopHandle> {
        let sample = self.sample_id(name).or_else(|| {
            warn!(name, "not playing unknown sample");
            None
        })?;
        let voice = next_voice_id();
        debug!(name, voice = voice.0, gain = opts.gain, cents = opts.detune_cents, "start");
        self.link.send(AudioCommand::Trigger(TriggerParams {
            sample,
            voice,
            gain: opts.gain,
            detune_cents: opts.detune_cents,
            decay_seconds: opts.decay_seconds,
            when: None,
            batch: None,
        }));
        Some(StopHandle {
            voice,
            decay_seconds: opts.decay_seconds,
            link: self.link.clone(),
            stopped: Cell::new(None),
        })
    }

    /// Schedule a voice start at an absolute rendering-clock time, tagged
    /// with a batch so the whole run can be cancelled. Returns whether the
    /// sample was known.
    pub fn start_at(&self, name: &str, when: f64, batch: BatchId, opts: &StartOpts) -> bool {
        let Some(sample) = self.sample_id(name) else {
            warn!(name, "not scheduling unknown sample");
            return false;
        };
        self.link.send(AudioCommand::Trigger(TriggerParams {
            sample,
            voice: next_voice_id(),
            gain: opts.gain,
            detune_cents: opts.detune_cents,
            decay_seconds: opts.decay_seconds,
            when: Some(when),
            batch: Some(batch),
        }));
        true
    }
}

/// Releases one voice. Stopping is always a fade: the release ramp starts at
/// the stop time and the voice ends at the ramp's end, never with a click.
pub struct StopHandle {
    voice: VoiceId,
    decay_seconds: f64,
    link: EngineLink,
    stopped: Cell<Option<f64>>,
}

impl StopHandle {
    /// Begin the release fade now. Idempotent: the second call is a no-op
    /// that returns the stop time computed by the first.
    pub fn stop(&self) -> f64 {
        let now = self.link.now();
        self.stop_at(now)
    }

    /// Begin the release fade at `at` on the rendering clock.
    pub fn stop_at(&self, at: f64) -> f64 {
        if let Some(stop_at) = self.stopped.get() {
            return stop_at;
        }
        let stop_at = at + self.decay_seconds;
        self.link.send(AudioCommand::Release {
            voice: self.voice,
            at,
        });
        self.stopped.set(Some(stop_at));
        stop_at
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }
}
