use conductor::config;
use conductor::core::audio::{AudioClock, SimulatedAudio};
use conductor::game::beatmap::{Beatmap, NoteEvent, NoteType};
use conductor::game::gameplay::{self, SessionEvent};
use conductor::game::judgment::HitScore;
use conductor::game::lanes::LaneRegistry;
use conductor::game::timing::ConductorStatus;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEMO_SEED: u64 = 0x5EED;
const DEMO_BPM: f32 = 120.0;
const DEMO_BEATS: u32 = 64;
// Extra device time allowed past the end of the track before giving up.
const RUNAWAY_GRACE_S: f64 = 10.0;

/// A short generated chart: one note per half beat on a random open lane,
/// the occasional jump onto the opposite lane and a few holds that keep
/// their lane closed until they end.
fn demo_beatmap(seed: u64) -> Beatmap {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut registry = LaneRegistry::new();
    let mut notes = Vec::new();

    for step in 0..DEMO_BEATS * 2 {
        let beat = step as f32 * 0.5;
        registry.release_expired(beat);
        let Some(lane) = registry.random_lane(&mut rng) else {
            continue;
        };

        if rng.random_bool(0.1) {
            let end_beat = beat + 2.0;
            notes.push(NoteEvent::held(beat, end_beat, lane));
            registry.block_until(lane, end_beat + 0.5);
            continue;
        }
        notes.push(NoteEvent::tap(beat, lane));

        let opposite = lane.opposite();
        if step % 8 == 0 && registry.status(opposite).can_spawn_notes {
            notes.push(NoteEvent::tap(beat, opposite).with_type(NoteType::Chord));
        }
    }

    let mut beatmap = Beatmap::new(DEMO_BPM, 0.25, notes);
    beatmap.map_name = "Demo".to_string();
    beatmap.map_description = format!("Generated from seed {seed:#x}");
    beatmap.song_length = (DEMO_BEATS as f32 + 4.0) * beatmap.tempo();
    beatmap
}

fn track_length(beatmap: &Beatmap) -> f64 {
    if beatmap.song_length > 0.0 {
        return f64::from(beatmap.song_length);
    }
    // No length in the map: stop a couple of beats after the last note.
    let last_beat = beatmap
        .notes
        .iter()
        .map(|n| n.beat.max(n.end_beat))
        .fold(0.0_f32, f32::max);
    f64::from(beatmap.start_offset + (last_beat + 2.0) * beatmap.tempo())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    config::load();
    let cfg = config::get();
    log::set_max_level(cfg.log_level.as_level_filter());

    let beatmap = match std::env::args().nth(1) {
        Some(path) => Beatmap::load(&path)?,
        None => {
            info!("No beatmap given, playing the built-in demo.");
            demo_beatmap(DEMO_SEED)
        }
    };

    let track = track_length(&beatmap);
    let mut audio = SimulatedAudio::new(track).with_pitch(cfg.music_rate);
    let field = cfg.note_field();
    let mut state = gameplay::init(beatmap, &cfg.session_config())?;

    let dt = 1.0 / f64::from(cfg.tick_rate.max(1));
    let countdown_s = f64::from(cfg.countdown_steps) * cfg.countdown_step_seconds;
    let deadline = countdown_s + track / f64::from(audio.pitch()) + RUNAWAY_GRACE_S;

    loop {
        audio.advance(dt);
        let status = gameplay::update(&mut state, &mut audio, &field);
        for event in state.drain_events() {
            if let SessionEvent::Judged(judgment) = event
                && judgment.score == HitScore::Miss
            {
                debug!("Miss on {:?} ({:?}).", judgment.lane, judgment.resolution);
            }
        }
        if status == ConductorStatus::Finished {
            break;
        }
        if cfg.autoplay {
            gameplay::queue_autoplay_inputs(&mut state);
        }
        if audio.dsp_time() > deadline {
            warn!("Session still running {RUNAWAY_GRACE_S:.0}s past the end of the track; stopping.");
            gameplay::stop(&mut state, &mut audio);
            break;
        }
    }

    let summary = state.summary();
    info!(
        "'{}': {} of {} notes hit ({:.1}%).",
        summary.map_name,
        summary.tally.total() - summary.tally.miss(),
        summary.total_notes,
        summary.tally.hit_ratio() * 100.0
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
