use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SAMPLE_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies a decoded buffer registered with the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleId(pub u64);

/// Identifies one sounding (or about-to-sound) voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Groups the triggers scheduled by one sequencer run so they can be
/// cancelled together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(pub u64);

// atomic counters so ids can be minted from any thread
pub fn next_sample_id() -> SampleId {
    SampleId(NEXT_SAMPLE_ID.fetch_add(1, Ordering::Relaxed))
}

pub fn next_voice_id() -> VoiceId {
    VoiceId(NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed))
}

pub fn next_batch_id() -> BatchId {
    BatchId(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
}
