use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::error;

use crate::audio_api::{AudioCommand, EngineEvent};

pub mod clock;
pub mod engine;
pub mod frame;
pub mod ids;
pub mod offline;
pub mod sample_buffer;
pub mod voice;

pub use clock::EngineClock;
pub use frame::StereoFrame;
pub use ids::{BatchId, SampleId, VoiceId, next_batch_id, next_sample_id, next_voice_id};
pub use sample_buffer::SampleBuffer;

use engine::Engine;

const COMMAND_QUEUE: usize = 1024;
const EVENT_QUEUE: usize = 64;
const ANALYSIS_QUEUE: usize = 16;

/// What the control-side components need to talk to a running engine: the
/// command channel, the rendering clock, and the playing counter. Cheap to
/// clone; every player/scheduler holds one.
#[derive(Clone)]
pub struct EngineLink {
    tx: Sender<AudioCommand>,
    clock: EngineClock,
    playing: Arc<AtomicUsize>,
}

impl EngineLink {
    pub fn send(&self, cmd: AudioCommand) {
        // drop-on-full: a stalled engine must never block the control side
        let _ = self.tx.try_send(cmd);
    }

    pub fn clock(&self) -> &EngineClock {
        &self.clock
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Coarse "is anything audible" count; eventually consistent by design.
    pub fn playing_count(&self) -> usize {
        self.playing.load(Ordering::Relaxed)
    }
}

/// A live audio engine bound to the default output device. Dropping it stops
/// the stream and every voice with it.
pub struct AudioHandle {
    link: EngineLink,
    events: Receiver<EngineEvent>,
    analysis: Receiver<Vec<StereoFrame>>,
    sample_rate: u32,
    _stream: cpal::Stream,
}

impl AudioHandle {
    pub fn link(&self) -> EngineLink {
        self.link.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn poll_event(&self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }

    /// Most recent rendered blocks, for oscilloscope/spectrum collaborators.
    pub fn poll_analysis(&self) -> Option<Vec<StereoFrame>> {
        self.analysis.try_recv().ok()
    }
}

pub fn start_audio() -> anyhow::Result<AudioHandle> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no default output device")?;
    let config = device
        .default_output_config()
        .context("no default output config")?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        anyhow::bail!("unsupported sample format (only f32 supported for now)");
    }

    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;
    let stream_config: cpal::StreamConfig = config.into();

    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
    let (event_tx, event_rx) = crossbeam_channel::bounded::<EngineEvent>(EVENT_QUEUE);
    let (analysis_tx, analysis_rx) = crossbeam_channel::bounded::<Vec<StereoFrame>>(ANALYSIS_QUEUE);

    let clock = EngineClock::new(sample_rate);
    let playing = Arc::new(AtomicUsize::new(0));
    let link = EngineLink {
        tx,
        clock: clock.clone(),
        playing: playing.clone(),
    };

    let mut engine = Engine::new(clock, playing, event_tx, analysis_tx);
    let mut block: Vec<StereoFrame> = Vec::new();

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _info| {
            while let Ok(cmd) = rx.try_recv() {
                engine.handle_cmd(cmd);
            }

            let n_frames = data.len() / channels;
            block.resize(n_frames, StereoFrame::zero());
            engine.render_block(&mut block);

            // interleave into however many channels the device wants
            for (i, chunk) in data.chunks_mut(channels).enumerate() {
                let frame = block[i];
                chunk[0] = frame.left;
                if chunk.len() > 1 {
                    chunk[1] = frame.right;
                }
                for extra in chunk.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }
        },
        |err| error!("audio output stream error: {err}"),
        None,
    )?;
    stream.play().context("failed to play output stream")?;

    Ok(AudioHandle {
        link,
        events: event_rx,
        analysis: analysis_rx,
        sample_rate,
        _stream: stream,
    })
}
