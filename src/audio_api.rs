use std::sync::Arc;

use crate::audio::{BatchId, SampleBuffer, SampleId, VoiceId};

/// One voice start. `when == None` means "now"; otherwise an absolute time on
/// the rendering clock.
#[derive(Clone, Debug)]
pub struct TriggerParams {
    pub sample: SampleId,
    pub voice: VoiceId,
    pub gain: f32,
    pub detune_cents: f64,
    pub decay_seconds: f64,
    pub when: Option<f64>,
    pub batch: Option<BatchId>,
}

/// Everything the control side may ask of the engine. Commands are drained at
/// the top of each rendered block; nothing here blocks the audio callback.
#[derive(Clone, Debug)]
pub enum AudioCommand {
    // Buffers are decoded off the audio thread and handed over ready to play.
    RegisterSample {
        id: SampleId,
        buffer: Arc<SampleBuffer>,
    },
    Trigger(TriggerParams),
    // Start the voice's release ramp at `at`; the voice ends at the ramp's end.
    Release {
        voice: VoiceId,
        at: f64,
    },
    // Drop every pending trigger of the batch and release its sounding voices.
    CancelBatch {
        batch: BatchId,
        at: f64,
    },
    // Fires an EngineEvent::SentinelFired once the clock passes `at`.
    ScheduleSentinel {
        batch: BatchId,
        at: f64,
    },
    // Rescale every not-yet-fired trigger and sentinel:
    // when' = origin + (when - origin) * ratio. Past events are untouched.
    RescalePending {
        origin: f64,
        ratio: f64,
    },
    SetMasterGain(f32),
}

/// Notifications flowing back from the render thread to whoever polls them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineEvent {
    SentinelFired { batch: BatchId, at: f64 },
}
