use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tracing::info;

use samplepad::player::FsFetcher;
use samplepad::scheduler::BeatScheduler;
use samplepad::sequence::{Sequence, SequenceNote};
use samplepad::{Player, instrument};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let sample_dir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: samplepad <sample-dir> [instrument]")?;
    let wanted = std::env::args().nth(2);

    let index_json = std::fs::read_to_string(sample_dir.join("instruments.json"))
        .context("no instruments.json in sample dir")?;
    let index = instrument::parse_index(&index_json)?;
    let kits = index.get("percussion").context("no percussion category")?;
    let (name, files) = match &wanted {
        Some(name) => (name.as_str(), kits.get(name).context("unknown instrument")?),
        None => {
            let (name, files) = kits.iter().next().context("empty percussion category")?;
            (name.as_str(), files)
        }
    };
    info!(name, files = files.len(), "loading instrument");

    let audio = samplepad::start_audio()?;
    let mut player = Player::new(
        audio.link(),
        audio.sample_rate(),
        Box::new(FsFetcher::new(&sample_dir)),
    );
    let kit = instrument::load_drum_kit(&mut player, "", "percussion", name, files);
    info!(pieces = kit.len(), "kit ready");

    // four-on-the-floor on the first piece, offbeats on the second
    let mut sequence = Sequence::new();
    let mut pieces = kit.values().filter_map(|v| v.first());
    if let Some(first) = pieces.next() {
        for beat in (0u32..32).step_by(8) {
            sequence.push(SequenceNote { note: first.clone(), beat });
        }
    }
    if let Some(second) = pieces.next() {
        for beat in (4u32..32).step_by(8) {
            sequence.push(SequenceNote { note: second.clone(), beat });
        }
    }

    let mut scheduler = BeatScheduler::new(audio.link());
    scheduler.set_loop(true);
    scheduler.set_tempo(120.0);
    scheduler.play(&player, &sequence);
    info!(tempo = scheduler.tempo_bpm(), "playing");

    let started = Instant::now();
    let mut bumped = false;
    while started.elapsed() < Duration::from_secs(12) {
        while let Some(event) = audio.poll_event() {
            scheduler.handle_event(event, &player, &sequence);
        }
        if !bumped && started.elapsed() > Duration::from_secs(6) {
            scheduler.set_tempo(160.0);
            info!(tempo = scheduler.tempo_bpm(), "tempo change");
            bumped = true;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    scheduler.stop();
    info!(playing = audio.link().playing_count(), "stopping");
    Ok(())
}
