use crate::core::audio::AudioClock;
use crate::core::input::{InputEdge, LANE_COUNT, Lane};
use crate::game::beatmap::{Beatmap, BeatmapError, NoteType};
use crate::game::judgment::{
    HitScore, JudgeOffsets, JudgeOffsetsError, Judgment, Resolution, distance_to_target,
};
use crate::game::lanes::LaneQueues;
use crate::game::note::{NoteField, NoteId, NoteInstance, NoteKind};
use crate::game::scores::{ScoreTally, SessionSummary};
use crate::game::timing::{BeatClock, ConductorStatus, CountdownSettings, CountdownTick};
use chrono::{DateTime, Local};
use log::{debug, info, trace, warn};
use smallvec::SmallVec;
use std::collections::VecDeque;
use thiserror::Error;

// Seconds of device time between progress lines in the log.
const PROGRESS_LOG_INTERVAL_S: f64 = 1.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub judge_offsets: JudgeOffsets,
    pub beats_shown_in_advance: f32,
    pub countdown: CountdownSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            judge_offsets: JudgeOffsets::default(),
            beats_shown_in_advance: 1.0,
            countdown: CountdownSettings::default(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("invalid beatmap: {0}")]
    Beatmap(#[from] BeatmapError),

    #[error("invalid judge offsets: {0}")]
    JudgeOffsets(#[from] JudgeOffsetsError),

    #[error("beats shown in advance must be a positive number, got {0}")]
    InvalidLookahead(f32),
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        self.judge_offsets.validate()?;
        let ahead = self.beats_shown_in_advance;
        if !ahead.is_finite() || ahead <= 0.0 {
            return Err(SessionError::InvalidLookahead(ahead));
        }
        Ok(())
    }
}

/// Everything a session reports back to its host, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    CountdownStep(u32),
    StatusChanged {
        from: ConductorStatus,
        to: ConductorStatus,
    },
    Spawned {
        note: NoteId,
        lane: Lane,
        beat: f32,
        end_beat: Option<f32>,
        note_type: NoteType,
    },
    HoldStarted {
        note: NoteId,
        lane: Lane,
        press_score: HitScore,
    },
    Judged(Judgment),
    Destroyed {
        note: NoteId,
        lane: Lane,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ActiveHold {
    pub note: NoteId,
    pub end_beat: f32,
    pub press_score: HitScore,
    pub press_distance: f32,
}

/// One play session: the clock, the scheduler cursor, the lane queues and
/// the tally. Hosts drive it with [`update`] once per frame.
pub struct State {
    beatmap: Beatmap,
    clock: BeatClock,
    judge_offsets: JudgeOffsets,
    notes: Vec<NoteInstance>,
    note_spawn_cursor: usize,
    lanes: LaneQueues,
    active_holds: [Option<ActiveHold>; LANE_COUNT],
    lane_pressed: [bool; LANE_COUNT],
    pending_edges: VecDeque<InputEdge>,
    tally: ScoreTally,
    events: Vec<SessionEvent>,
    audio_done: bool,
    last_progress_log: f64,
    played_at: DateTime<Local>,
}

impl State {
    /// The session's copy of the map, with live `note` bindings.
    pub fn beatmap(&self) -> &Beatmap {
        &self.beatmap
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn judge_offsets(&self) -> &JudgeOffsets {
        &self.judge_offsets
    }

    #[inline(always)]
    pub fn status(&self) -> ConductorStatus {
        self.clock.status()
    }

    #[inline(always)]
    pub fn tally(&self) -> ScoreTally {
        self.tally
    }

    #[inline(always)]
    pub fn note_spawn_cursor(&self) -> usize {
        self.note_spawn_cursor
    }

    pub fn note(&self, id: NoteId) -> Option<&NoteInstance> {
        self.notes.get(id.index())
    }

    pub fn spawned_notes(&self) -> &[NoteInstance] {
        &self.notes
    }

    pub fn lanes(&self) -> &LaneQueues {
        &self.lanes
    }

    pub fn active_hold(&self, lane: Lane) -> Option<&ActiveHold> {
        self.active_holds[lane.index()].as_ref()
    }

    pub fn is_lane_pressed(&self, lane: Lane) -> bool {
        self.lane_pressed[lane.index()]
    }

    pub fn pending_input_count(&self) -> usize {
        self.pending_edges.len()
    }

    /// Notes not yet resolved, spawned or not.
    pub fn remaining_notes(&self) -> usize {
        let unspawned = self.beatmap.notes.len() - self.note_spawn_cursor;
        let held = self.active_holds.iter().flatten().count();
        unspawned + self.lanes.total_len() + held
    }

    /// Takes every event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            map_name: self.beatmap.map_name.clone(),
            tally: self.tally,
            total_notes: self.beatmap.notes.len(),
            clock_desyncs: self.clock.desync_count(),
            played_at: self.played_at,
        }
    }
}

/// Validates the map and the settings and builds a session in `Countdown`.
/// Nothing is started when either is invalid.
pub fn init(mut beatmap: Beatmap, config: &SessionConfig) -> Result<State, SessionError> {
    config.validate()?;
    beatmap.validate()?;
    for event in &mut beatmap.notes {
        event.note = None;
    }

    let clock = BeatClock::new(
        beatmap.bpm,
        beatmap.start_offset,
        config.beats_shown_in_advance,
        config.countdown,
    );
    info!(
        "Session ready: '{}' ({} notes, {:.1} BPM, offset {:.3}s, {} beat(s) shown in advance).",
        beatmap.map_name,
        beatmap.notes.len(),
        beatmap.bpm,
        beatmap.start_offset,
        config.beats_shown_in_advance
    );

    Ok(State {
        notes: Vec::with_capacity(beatmap.notes.len()),
        beatmap,
        clock,
        judge_offsets: config.judge_offsets,
        note_spawn_cursor: 0,
        lanes: LaneQueues::new(),
        active_holds: [None; LANE_COUNT],
        lane_pressed: [false; LANE_COUNT],
        pending_edges: VecDeque::new(),
        tally: ScoreTally::new(),
        events: Vec::new(),
        audio_done: false,
        last_progress_log: f64::NEG_INFINITY,
        played_at: Local::now(),
    })
}

/* ------------------------------- Input ------------------------------- */

/// Buffers a press or release; it is applied on the next [`update`], after
/// that tick's spawn and timeout sweep.
pub fn queue_input_edge(state: &mut State, lane: Lane, pressed: bool) {
    match state.status() {
        ConductorStatus::Playing | ConductorStatus::Paused => {
            state.pending_edges.push_back(InputEdge { lane, pressed });
        }
        status => trace!("Ignoring {lane:?} input during {}.", status.as_str()),
    }
}

/// Same as [`queue_input_edge`] for a one-based lane number coming straight
/// from an input device. Unknown lanes are dropped; returns whether the edge
/// was accepted.
pub fn queue_raw_input_edge(state: &mut State, lane_number: u8, pressed: bool) -> bool {
    match Lane::from_number(lane_number) {
        Some(lane) => {
            queue_input_edge(state, lane, pressed);
            true
        }
        None => {
            warn!("Input for unknown lane {lane_number} ignored.");
            false
        }
    }
}

fn process_input_edges(state: &mut State) {
    while let Some(edge) = state.pending_edges.pop_front() {
        state.lane_pressed[edge.lane.index()] = edge.pressed;
        // Every press is graded; releases only matter to an active hold.
        if edge.pressed {
            if let Some(score) = judge_a_press(state, edge.lane) {
                trace!("Press on {:?} graded {}.", edge.lane, score.as_str());
            }
        } else {
            release_hold(state, edge.lane);
        }
    }
}

/// Grades a press against the head of `lane`. Returns `None` when nothing
/// was graded: the lane was empty, or its head is a held note while another
/// hold is still down on the lane.
fn judge_a_press(state: &mut State, lane: Lane) -> Option<HitScore> {
    let Some(id) = state.lanes.head(lane) else {
        trace!("Press on empty {lane:?}.");
        return None;
    };
    let (beat, kind) = {
        let note = &state.notes[id.index()];
        (note.beat, note.kind)
    };
    if kind != NoteKind::Tap && state.active_holds[lane.index()].is_some() {
        debug!("{lane:?} is already holding; press ignored for held note at beat {beat:.2}.");
        return None;
    }
    let distance = distance_to_target(
        state.clock.song_position_in_beats(),
        beat,
        state.clock.beats_shown_in_advance(),
    );
    let score = state.judge_offsets.classify(distance);

    state.lanes.pop_head(lane);
    state.notes[id.index()].handled = true;

    match kind {
        NoteKind::Held { end_beat } if score != HitScore::Miss => {
            state.active_holds[lane.index()] = Some(ActiveHold {
                note: id,
                end_beat,
                press_score: score,
                press_distance: distance,
            });
            debug!("Hold started on {lane:?} at beat {beat:.2} ({}).", score.as_str());
            state.events.push(SessionEvent::HoldStarted {
                note: id,
                lane,
                press_score: score,
            });
        }
        _ => resolve_note(state, id, score, Some(distance), Resolution::Hit),
    }
    Some(score)
}

/// Ends the active hold on `lane`, if any. Letting go before the end beat is
/// a miss; otherwise the hold keeps the grade of its press.
fn release_hold(state: &mut State, lane: Lane) {
    let Some(hold) = state.active_holds[lane.index()].take() else {
        return;
    };
    if state.clock.current_beat() >= hold.end_beat {
        resolve_note(state, hold.note, hold.press_score, Some(hold.press_distance), Resolution::Hit);
    } else {
        debug!(
            "Hold on {lane:?} let go at beat {:.2}, before {:.2}.",
            state.clock.current_beat(),
            hold.end_beat
        );
        resolve_note(state, hold.note, HitScore::Miss, Some(hold.press_distance), Resolution::LetGo);
    }
}

/* ------------------------------- Scheduling ------------------------------- */

/// Spawns every note whose beat has crossed the look-ahead horizon. A run of
/// notes sharing one beat always spawns in the same call.
fn spawn_lookahead_notes(state: &mut State) {
    let horizon = state.clock.song_position_in_beats();
    let len = state.beatmap.notes.len();
    let mut cursor = state.note_spawn_cursor;

    while cursor < len && state.beatmap.notes[cursor].beat < horizon {
        let chord_beat = state.beatmap.notes[cursor].beat;
        let mut chord: SmallVec<[NoteId; LANE_COUNT]> = SmallVec::new();
        chord.push(spawn_note(state, cursor));
        cursor += 1;
        while cursor < len && state.beatmap.notes[cursor].beat == chord_beat {
            chord.push(spawn_note(state, cursor));
            cursor += 1;
        }
        if chord.len() > 1 {
            debug!("Spawned {}-note chord at beat {chord_beat:.2}.", chord.len());
        }
    }

    debug_assert!(cursor >= state.note_spawn_cursor);
    state.note_spawn_cursor = cursor;
}

fn spawn_note(state: &mut State, event_index: usize) -> NoteId {
    let id = NoteId(state.notes.len() as u32);
    let event = &mut state.beatmap.notes[event_index];
    debug_assert!(event.note.is_none(), "note event {event_index} spawned twice");
    event.note = Some(id);

    let kind = NoteKind::for_event(event);
    let note = NoteInstance {
        id,
        event_index,
        beat: event.beat,
        lane: event.lane,
        kind,
        note_type: event.note_type,
        handled: false,
        resolved: false,
    };
    trace!("Spawn #{event_index} {:?} on {:?} at beat {:.2}.", note.note_type, note.lane, note.beat);
    state.events.push(SessionEvent::Spawned {
        note: id,
        lane: note.lane,
        beat: note.beat,
        end_beat: note.end_beat(),
        note_type: note.note_type,
    });
    state.lanes.enqueue(note.lane, id);
    state.notes.push(note);
    id
}

/* ----------------------------- Resolution ----------------------------- */

fn resolve_note(
    state: &mut State,
    id: NoteId,
    score: HitScore,
    distance_beats: Option<f32>,
    resolution: Resolution,
) {
    let note = &mut state.notes[id.index()];
    debug_assert!(!note.resolved, "note {id:?} resolved twice");
    note.handled = true;
    let lane = note.lane;
    let event_index = note.event_index;

    state.tally.record(score);
    state.events.push(SessionEvent::Judged(Judgment {
        note: id,
        lane,
        score,
        distance_beats,
        resolution,
    }));
    destroy_note(state, id, event_index, lane);
}

fn destroy_note(state: &mut State, id: NoteId, event_index: usize, lane: Lane) {
    state.notes[id.index()].resolved = true;
    state.beatmap.notes[event_index].note = None;
    state.events.push(SessionEvent::Destroyed { note: id, lane });
}

/// Removes lane heads that have scrolled past the offscreen threshold,
/// scoring the ones nobody hit as misses.
fn sweep_offscreen_notes<F: NoteField + ?Sized>(state: &mut State, field: &F) {
    let timing = state.clock.scroll_timing();
    for lane in Lane::ALL {
        let offscreen = field.offscreen_position(lane);
        while let Some(id) = state.lanes.head(lane) {
            let note = &state.notes[id.index()];
            let Some(position) = field.note_position(note, &timing) else {
                break;
            };
            if position > offscreen {
                break;
            }
            let handled = note.handled;
            let event_index = note.event_index;
            state.lanes.pop_head(lane);
            if handled {
                destroy_note(state, id, event_index, lane);
            } else {
                resolve_note(state, id, HitScore::Miss, None, Resolution::TimedOut);
            }
        }
    }
}

/* -------------------------------- Status -------------------------------- */

fn set_status(state: &mut State, to: ConductorStatus, from: ConductorStatus) {
    if from != to {
        info!("Conductor {} -> {}.", from.as_str(), to.as_str());
        state.events.push(SessionEvent::StatusChanged { from, to });
    }
}

/// `Playing -> Paused`. Stops the music; queues and cursor stay as they are.
pub fn pause<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) -> bool {
    let from = state.status();
    if !state.clock.pause(audio.dsp_time()) {
        return false;
    }
    audio.pause();
    set_status(state, ConductorStatus::Paused, from);
    true
}

/// `Paused -> Playing`. The paused stretch of device time is skipped.
pub fn resume<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) -> bool {
    let from = state.status();
    if !state.clock.resume(audio.dsp_time()) {
        return false;
    }
    audio.resume();
    set_status(state, ConductorStatus::Playing, from);
    true
}

/// Flips between `Playing` and `Paused`; any other status is left alone.
pub fn toggle_pause<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) -> ConductorStatus {
    match state.status() {
        ConductorStatus::Playing => {
            pause(state, audio);
        }
        ConductorStatus::Paused => {
            resume(state, audio);
        }
        _ => {}
    }
    state.status()
}

/// Ends the session now. Whatever is still queued or held is destroyed
/// without being scored.
pub fn stop<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) {
    if state.status() == ConductorStatus::Finished {
        return;
    }
    end_session(state, audio);
}

fn end_session<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) {
    let from = state.status();
    audio.stop();
    state.clock.finish();
    state.pending_edges.clear();

    let leftover_holds: SmallVec<[ActiveHold; LANE_COUNT]> =
        state.active_holds.iter_mut().filter_map(Option::take).collect();
    let leftover: Vec<NoteId> = state
        .lanes
        .drain_all()
        .into_iter()
        .chain(leftover_holds.iter().map(|h| h.note))
        .collect();
    if !leftover.is_empty() {
        warn!("Session ended with {} unresolved note(s).", leftover.len());
    }
    for id in leftover {
        let (event_index, lane) = {
            let note = &state.notes[id.index()];
            (note.event_index, note.lane)
        };
        destroy_note(state, id, event_index, lane);
    }

    set_status(state, ConductorStatus::Finished, from);
    info!("End. Final scores. {}", state.tally);
}

/// Holds still pressed past their end beat once the music is over are
/// completed with their press grade.
fn complete_overdue_holds(state: &mut State) {
    let current_beat = state.clock.current_beat();
    for lane in Lane::ALL {
        let overdue = state.active_holds[lane.index()]
            .as_ref()
            .is_some_and(|h| current_beat >= h.end_beat);
        if overdue {
            release_hold(state, lane);
        }
    }
}

fn check_finished<A: AudioClock + ?Sized>(state: &mut State, audio: &mut A) {
    if !state.audio_done && audio.has_finished() {
        state.audio_done = true;
        info!("Music finished at beat {:.2}.", state.clock.current_beat());
    }
    let map_empty = state.beatmap.notes.is_empty();
    if !(state.audio_done || map_empty) {
        return;
    }
    if state.note_spawn_cursor < state.beatmap.notes.len() || !state.lanes.is_empty() {
        return;
    }
    complete_overdue_holds(state);
    if state.active_holds.iter().any(Option::is_some) {
        return;
    }
    end_session(state, audio);
}

/* --------------------------------- Tick --------------------------------- */

/// Advances the session by one tick:
/// clock, spawn, timeout sweep, buffered input, finish check.
pub fn update<A, F>(state: &mut State, audio: &mut A, field: &F) -> ConductorStatus
where
    A: AudioClock + ?Sized,
    F: NoteField + ?Sized,
{
    let dsp_now = audio.dsp_time();
    match state.status() {
        ConductorStatus::Finished | ConductorStatus::Paused => return state.status(),
        ConductorStatus::Countdown => match state.clock.tick_countdown(dsp_now) {
            CountdownTick::Waiting => return state.status(),
            CountdownTick::Step(count) => {
                info!("{count}");
                state.events.push(SessionEvent::CountdownStep(count));
                return state.status();
            }
            CountdownTick::Done => {
                audio.play();
                state.clock.start_playback(dsp_now, audio.pitch());
                set_status(state, ConductorStatus::Playing, ConductorStatus::Countdown);
            }
        },
        ConductorStatus::Playing => {}
    }

    state.clock.sample(dsp_now, audio.pitch());
    spawn_lookahead_notes(state);
    sweep_offscreen_notes(state, field);
    process_input_edges(state);
    check_finished(state, audio);

    if dsp_now - state.last_progress_log >= PROGRESS_LOG_INTERVAL_S {
        state.last_progress_log = dsp_now;
        info!(
            "Beat: {:.2}, Time: {:.2}, Queued: {}, Remaining: {}, {}",
            state.clock.current_beat(),
            state.clock.song_position(),
            state.lanes.total_len(),
            state.remaining_notes(),
            state.tally
        );
    }
    state.status()
}

/// Queues the presses and releases a perfect player would make, based on the
/// state after the last [`update`]. Call once per tick, after `update`.
pub fn queue_autoplay_inputs(state: &mut State) {
    if state.status() != ConductorStatus::Playing {
        return;
    }
    let current_beat = state.clock.current_beat();
    for lane in Lane::ALL {
        let pressed = state.lane_pressed[lane.index()];
        match state.active_holds[lane.index()] {
            Some(hold) => {
                if current_beat >= hold.end_beat {
                    queue_input_edge(state, lane, false);
                }
            }
            None if pressed => queue_input_edge(state, lane, false),
            None => {
                let due = state
                    .lanes
                    .head(lane)
                    .is_some_and(|id| state.notes[id.index()].beat <= current_beat);
                if due {
                    queue_input_edge(state, lane, true);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::SimulatedAudio;
    use crate::game::beatmap::NoteEvent;
    use crate::game::note::{GameMode, LinearNoteField};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    // Notes enter at 1.0, are hit at 0.0 and leave the board at -0.5, i.e.
    // half the look-ahead after their beat.
    fn field() -> LinearNoteField {
        LinearNoteField::uniform(GameMode::Standard, 0.5)
    }

    fn config(ahead: f32) -> SessionConfig {
        SessionConfig {
            judge_offsets: JudgeOffsets {
                perfect: 0.05,
                good: 0.15,
                okay: 0.3,
            },
            beats_shown_in_advance: ahead,
            countdown: CountdownSettings {
                steps: 0,
                step_seconds: 1.0,
            },
        }
    }

    fn session(notes: Vec<NoteEvent>, ahead: f32) -> (State, SimulatedAudio) {
        let mut map = Beatmap::new(120.0, 0.0, notes);
        map.song_length = 30.0;
        let state = init(map, &config(ahead)).expect("test map should be valid");
        (state, SimulatedAudio::new(30.0))
    }

    /// Moves the device clock to `dsp` and runs one tick.
    fn tick_at(state: &mut State, audio: &mut SimulatedAudio, dsp: f64) -> ConductorStatus {
        let now = audio.dsp_time();
        audio.advance(dsp - now);
        update(state, audio, &field())
    }

    fn spawned_ids(events: &[SessionEvent]) -> Vec<NoteId> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Spawned { note, .. } => Some(*note),
                _ => None,
            })
            .collect()
    }

    fn judgments(events: &[SessionEvent]) -> Vec<Judgment> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Judged(j) => Some(j.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn invalid_maps_never_start() {
        let map = Beatmap::new(
            120.0,
            0.0,
            vec![NoteEvent::tap(2.0, Lane::Lane1), NoteEvent::tap(1.0, Lane::Lane1)],
        );
        assert!(matches!(
            init(map, &config(1.0)),
            Err(SessionError::Beatmap(BeatmapError::UnsortedNotes { .. }))
        ));

        let map = Beatmap::new(-10.0, 0.0, Vec::new());
        assert!(matches!(
            init(map, &config(1.0)),
            Err(SessionError::Beatmap(BeatmapError::NonPositiveBpm(_)))
        ));

        let mut bad = config(1.0);
        bad.judge_offsets.good = 0.01;
        assert!(matches!(
            init(Beatmap::new(120.0, 0.0, Vec::new()), &bad),
            Err(SessionError::JudgeOffsets(_))
        ));
        assert!(matches!(
            init(Beatmap::new(120.0, 0.0, Vec::new()), &config(0.0)),
            Err(SessionError::InvalidLookahead(_))
        ));
    }

    #[test]
    fn countdown_runs_before_playback() {
        let map = Beatmap::new(120.0, 0.0, vec![NoteEvent::tap(0.0, Lane::Lane1)]);
        let mut state = init(map, &SessionConfig::default()).unwrap();
        let mut audio = SimulatedAudio::new(10.0);

        assert_eq!(tick_at(&mut state, &mut audio, 0.0), ConductorStatus::Countdown);
        assert_eq!(tick_at(&mut state, &mut audio, 1.0), ConductorStatus::Countdown);
        assert_eq!(tick_at(&mut state, &mut audio, 2.0), ConductorStatus::Countdown);
        assert!(!audio.is_playing());
        assert!(state.spawned_notes().is_empty(), "nothing spawns during countdown");
        assert_eq!(tick_at(&mut state, &mut audio, 3.0), ConductorStatus::Playing);
        assert!(audio.is_playing());

        let events = state.drain_events();
        let steps: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::CountdownStep(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![3, 2, 1]);
        assert!(events.contains(&SessionEvent::StatusChanged {
            from: ConductorStatus::Countdown,
            to: ConductorStatus::Playing,
        }));
        assert_eq!(spawned_ids(&events).len(), 1);
    }

    #[test]
    fn chord_at_beat_zero_spawns_in_one_tick() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::tap(0.0, Lane::Lane1), NoteEvent::tap(0.0, Lane::Lane2)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        let spawned = spawned_ids(&state.drain_events());
        assert_eq!(spawned, vec![NoteId(0), NoteId(1)]);
        assert_eq!(state.lanes().head(Lane::Lane1), Some(NoteId(0)));
        assert_eq!(state.lanes().head(Lane::Lane2), Some(NoteId(1)));
        assert_eq!(state.beatmap.notes[0].note, Some(NoteId(0)));
        assert_eq!(state.beatmap.notes[1].note, Some(NoteId(1)));
    }

    #[test]
    fn long_chords_spawn_together_and_later_notes_wait() {
        let (mut state, mut audio) = session(
            vec![
                NoteEvent::tap(2.0, Lane::Lane1),
                NoteEvent::tap(2.0, Lane::Lane2),
                NoteEvent::tap(2.0, Lane::Lane3),
                NoteEvent::held(2.0, 4.0, Lane::Lane4),
                NoteEvent::tap(2.5, Lane::Lane1),
            ],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        // Horizon at beat 1.9: nothing yet.
        tick_at(&mut state, &mut audio, 0.45);
        assert_eq!(state.note_spawn_cursor(), 0);
        // Horizon at beat 2.1: the whole chord, but not beat 2.5.
        tick_at(&mut state, &mut audio, 0.55);
        assert_eq!(state.note_spawn_cursor(), 4);
        let events = state.drain_events();
        assert_eq!(spawned_ids(&events).len(), 4);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Spawned { lane: Lane::Lane4, end_beat: Some(end), .. } if *end == 4.0
        )));
    }

    #[test]
    fn notes_behind_the_horizon_spawn_on_the_first_tick() {
        let (mut state, mut audio) = session(
            (0..4).map(|b| NoteEvent::tap(b as f32, Lane::Lane1)).collect(),
            4.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        assert_eq!(state.note_spawn_cursor(), 4);
        assert_eq!(state.lanes().len(Lane::Lane1), 4);
    }

    #[test]
    fn press_close_to_the_beat_is_perfect() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(4.0, Lane::Lane1)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.6);
        assert_eq!(state.lanes().len(Lane::Lane1), 1);

        // Beat 4.01: song_position_in_beats = 4 + 1 + 0.01.
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 2.005);
        let judged = judgments(&state.drain_events());
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].score, HitScore::Perfect);
        assert_eq!(judged[0].resolution, Resolution::Hit);
        assert!((judged[0].distance_beats.unwrap() - 0.01).abs() < 1e-3);
        assert_eq!(state.tally().perfect(), 1);
        assert_eq!(state.tally().total(), 1);
        assert!(state.lanes().is_empty());
        assert_eq!(state.beatmap.notes[0].note, None);
    }

    #[test]
    fn grades_follow_the_distance_to_the_beat() {
        let (mut state, mut audio) = session(
            vec![
                NoteEvent::tap(4.0, Lane::Lane1),
                NoteEvent::tap(4.0, Lane::Lane2),
                NoteEvent::tap(4.0, Lane::Lane3),
                NoteEvent::tap(4.0, Lane::Lane4),
            ],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        // Beat 3.9 (Good), 4.2 (Okay), 4.4 (Miss), then nothing left in lane 1.
        tick_at(&mut state, &mut audio, 1.9);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.95);
        queue_input_edge(&mut state, Lane::Lane2, true);
        tick_at(&mut state, &mut audio, 2.1);
        queue_input_edge(&mut state, Lane::Lane3, true);
        tick_at(&mut state, &mut audio, 2.2);

        let tally = state.tally();
        assert_eq!((tally.perfect(), tally.good(), tally.okay(), tally.miss()), (0, 1, 1, 1));
        assert_eq!(state.lanes().len(Lane::Lane4), 1);
    }

    #[test]
    fn unhit_note_times_out_as_a_miss() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(4.0, Lane::Lane1)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 2.2);
        assert_eq!(state.lanes().len(Lane::Lane1), 1, "not past the offscreen line yet");
        tick_at(&mut state, &mut audio, 2.3);

        let events = state.drain_events();
        let judged = judgments(&events);
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].score, HitScore::Miss);
        assert_eq!(judged[0].resolution, Resolution::TimedOut);
        assert!(events.contains(&SessionEvent::Destroyed {
            note: NoteId(0),
            lane: Lane::Lane1
        }));
        assert_eq!(state.tally().miss(), 1);
        assert!(state.lanes().is_empty());
    }

    #[test]
    fn repeated_presses_without_release_are_each_graded() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::tap(2.0, Lane::Lane1), NoteEvent::tap(3.0, Lane::Lane1)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.5);

        assert_eq!(state.tally().perfect(), 2, "second press on the lane was dropped");
        assert_eq!(state.tally().total(), 2);
        assert!(state.lanes().is_empty());
        assert!(state.is_lane_pressed(Lane::Lane1));
    }

    #[test]
    fn tap_behind_an_active_hold_resolves_before_it() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::held(2.0, 6.0, Lane::Lane1), NoteEvent::tap(4.0, Lane::Lane1)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.0);
        assert!(state.active_hold(Lane::Lane1).is_some());

        // The hold left the queue on press, so the tap behind it is the head
        // and times out while the hold is still down.
        tick_at(&mut state, &mut audio, 2.0);
        assert_eq!(state.lanes().head(Lane::Lane1), Some(NoteId(1)));
        tick_at(&mut state, &mut audio, 2.3);
        queue_input_edge(&mut state, Lane::Lane1, false);
        tick_at(&mut state, &mut audio, 3.1);

        let judged = judgments(&state.drain_events());
        let order: Vec<(NoteId, HitScore, Resolution)> =
            judged.iter().map(|j| (j.note, j.score, j.resolution)).collect();
        assert_eq!(
            order,
            vec![
                (NoteId(1), HitScore::Miss, Resolution::TimedOut),
                (NoteId(0), HitScore::Perfect, Resolution::Hit),
            ]
        );
    }

    #[test]
    fn taps_can_be_hit_while_a_hold_is_down() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::held(2.0, 6.0, Lane::Lane1), NoteEvent::tap(4.0, Lane::Lane1)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 2.0);
        assert_eq!(state.tally().perfect(), 1);
        assert!(state.active_hold(Lane::Lane1).is_some(), "the hold is still down");

        queue_input_edge(&mut state, Lane::Lane1, false);
        tick_at(&mut state, &mut audio, 3.1);
        assert_eq!(state.tally().perfect(), 2);
    }

    #[test]
    fn second_hold_press_is_ignored_while_one_is_down() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::held(2.0, 6.0, Lane::Lane1), NoteEvent::held(2.0, 3.0, Lane::Lane1)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 1.0);
        assert_eq!(state.active_hold(Lane::Lane1).map(|h| h.note), Some(NoteId(0)));
        assert_eq!(state.lanes().head(Lane::Lane1), Some(NoteId(1)));
        assert_eq!(state.tally().total(), 0);
    }

    #[test]
    fn press_on_an_empty_lane_scores_nothing() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(8.0, Lane::Lane2)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        queue_input_edge(&mut state, Lane::Lane1, false);
        tick_at(&mut state, &mut audio, 0.5);
        assert_eq!(state.tally().total(), 0);
        assert_eq!(state.pending_input_count(), 0);
    }

    #[test]
    fn unknown_lane_numbers_are_ignored() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(0.0, Lane::Lane1)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        assert!(!queue_raw_input_edge(&mut state, 0, true));
        assert!(!queue_raw_input_edge(&mut state, 5, true));
        assert_eq!(state.pending_input_count(), 0);
        assert!(queue_raw_input_edge(&mut state, 1, true));
        tick_at(&mut state, &mut audio, 0.01);
        assert_eq!(state.tally().perfect(), 1);
    }

    #[test]
    fn held_note_stays_active_until_released_after_its_end() {
        let (mut state, mut audio) = session(vec![NoteEvent::held(2.0, 6.0, Lane::Lane3)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 0.6);
        assert_eq!(state.lanes().len(Lane::Lane3), 1);

        queue_input_edge(&mut state, Lane::Lane3, true);
        tick_at(&mut state, &mut audio, 1.0);
        let hold = *state.active_hold(Lane::Lane3).expect("press should start the hold");
        assert_eq!(hold.press_score, HitScore::Perfect);
        assert_eq!(hold.end_beat, 6.0);
        assert!(state.lanes().is_empty());
        assert_eq!(state.tally().total(), 0, "a hold is not scored on press");

        // Well past where the head would have timed out.
        tick_at(&mut state, &mut audio, 2.5);
        assert!(state.active_hold(Lane::Lane3).is_some());
        assert_eq!(state.tally().total(), 0);

        queue_input_edge(&mut state, Lane::Lane3, false);
        tick_at(&mut state, &mut audio, 3.1);
        assert!(state.active_hold(Lane::Lane3).is_none());
        assert_eq!(state.tally().perfect(), 1);
        assert_eq!(state.tally().total(), 1);
    }

    #[test]
    fn releasing_a_hold_early_is_a_miss() {
        let (mut state, mut audio) = session(vec![NoteEvent::held(2.0, 6.0, Lane::Lane3)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane3, true);
        tick_at(&mut state, &mut audio, 1.0);
        queue_input_edge(&mut state, Lane::Lane3, false);
        tick_at(&mut state, &mut audio, 2.0);

        let judged = judgments(&state.drain_events());
        assert_eq!(judged.len(), 1);
        assert_eq!(judged[0].score, HitScore::Miss);
        assert_eq!(judged[0].resolution, Resolution::LetGo);
        assert_eq!(state.tally().miss(), 1);
    }

    #[test]
    fn unpressed_hold_times_out_like_a_tap() {
        let (mut state, mut audio) = session(vec![NoteEvent::held(2.0, 6.0, Lane::Lane3)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.3);
        assert_eq!(state.tally().miss(), 1);
        assert!(state.active_hold(Lane::Lane3).is_none());
    }

    #[test]
    fn badly_timed_press_on_a_hold_misses_immediately() {
        let (mut state, mut audio) = session(vec![NoteEvent::held(2.0, 6.0, Lane::Lane3)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        // Beat 1.4 is outside the okay window.
        queue_input_edge(&mut state, Lane::Lane3, true);
        tick_at(&mut state, &mut audio, 0.7);
        assert!(state.active_hold(Lane::Lane3).is_none());
        assert_eq!(state.tally().miss(), 1);
    }

    #[test]
    fn same_tick_timeout_is_swept_before_input() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::tap(4.0, Lane::Lane1), NoteEvent::tap(8.0, Lane::Lane1)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 2.2);
        // The press lands in the tick where note 0 crosses the offscreen
        // line; the sweep claims it and the press finds nothing due yet.
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 2.3);

        let judged = judgments(&state.drain_events());
        assert_eq!(judged.len(), 1, "exactly one resolution for the timed-out note");
        assert_eq!(judged[0].note, NoteId(0));
        assert_eq!(judged[0].resolution, Resolution::TimedOut);
        assert_eq!(state.tally().miss(), 1);
        assert_eq!(state.tally().total(), 1);
        assert_eq!(state.note_spawn_cursor(), 1, "note at beat 8 is still ahead");
    }

    #[test]
    fn pause_freezes_clock_spawning_and_queues() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::tap(4.0, Lane::Lane1), NoteEvent::tap(6.0, Lane::Lane2)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.8);
        let beats_at_pause = state.clock.song_position_in_beats();
        let queued_at_pause = state.lanes().total_len();

        assert!(pause(&mut state, &mut audio));
        assert!(audio.is_paused());
        assert_eq!(tick_at(&mut state, &mut audio, 8.0), ConductorStatus::Paused);
        assert_eq!(tick_at(&mut state, &mut audio, 11.8), ConductorStatus::Paused);
        assert_eq!(state.clock.song_position_in_beats(), beats_at_pause);
        assert_eq!(state.lanes().total_len(), queued_at_pause);
        assert_eq!(state.tally().total(), 0, "nothing times out while paused");

        assert_eq!(toggle_pause(&mut state, &mut audio), ConductorStatus::Playing);
        tick_at(&mut state, &mut audio, 11.8);
        assert_eq!(state.clock.song_position_in_beats(), beats_at_pause);
        assert_eq!(state.lanes().total_len(), queued_at_pause);
    }

    #[test]
    fn pause_and_resume_without_a_tick_is_a_no_op() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(4.0, Lane::Lane1)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.7);
        let beats = state.clock.song_position_in_beats();
        let cursor = state.note_spawn_cursor();
        let head = state.lanes().head(Lane::Lane1);

        assert_eq!(toggle_pause(&mut state, &mut audio), ConductorStatus::Paused);
        assert_eq!(toggle_pause(&mut state, &mut audio), ConductorStatus::Playing);
        assert_eq!(state.clock.song_position_in_beats(), beats);
        assert_eq!(state.note_spawn_cursor(), cursor);
        assert_eq!(state.lanes().head(Lane::Lane1), head);
    }

    #[test]
    fn empty_map_finishes_right_after_countdown() {
        let map = Beatmap::new(120.0, 0.0, Vec::new());
        let mut state = init(map, &SessionConfig::default()).unwrap();
        let mut audio = SimulatedAudio::new(60.0);
        for second in 0..3 {
            assert_eq!(tick_at(&mut state, &mut audio, second as f64), ConductorStatus::Countdown);
        }
        assert_eq!(tick_at(&mut state, &mut audio, 3.0), ConductorStatus::Finished);
        assert!(!audio.is_playing());
        assert_eq!(state.tally().total(), 0);
    }

    #[test]
    fn finished_session_clears_everything_and_ignores_input() {
        let (mut state, _) = session(vec![NoteEvent::tap(1.0, Lane::Lane1)], 1.0);
        let mut audio = SimulatedAudio::new(1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.0);
        assert_eq!(state.status(), ConductorStatus::Finished);
        assert!(state.lanes().is_empty());
        assert_eq!(state.remaining_notes(), 0);
        assert!(state.beatmap.notes.iter().all(|n| n.note.is_none()));
        assert_eq!(state.tally().miss(), 1);

        queue_input_edge(&mut state, Lane::Lane1, true);
        assert_eq!(state.pending_input_count(), 0);
        assert_eq!(tick_at(&mut state, &mut audio, 2.0), ConductorStatus::Finished);
    }

    #[test]
    fn stop_destroys_unresolved_notes_without_scoring() {
        let (mut state, mut audio) = session(
            vec![NoteEvent::tap(1.0, Lane::Lane1), NoteEvent::held(1.0, 5.0, Lane::Lane2)],
            1.0,
        );
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane2, true);
        tick_at(&mut state, &mut audio, 0.5);
        assert!(state.active_hold(Lane::Lane2).is_some());

        stop(&mut state, &mut audio);
        assert_eq!(state.status(), ConductorStatus::Finished);
        assert!(state.lanes().is_empty());
        assert!(state.active_hold(Lane::Lane2).is_none());
        assert_eq!(state.tally().total(), 0);
        assert!(state.spawned_notes().iter().all(|n| n.resolved));
    }

    #[test]
    fn session_waits_for_holds_still_pressed_when_music_ends() {
        let (mut state, _) = session(vec![NoteEvent::held(1.0, 6.0, Lane::Lane1)], 1.0);
        let mut audio = SimulatedAudio::new(1.0);
        tick_at(&mut state, &mut audio, 0.0);
        queue_input_edge(&mut state, Lane::Lane1, true);
        tick_at(&mut state, &mut audio, 0.5);
        assert_eq!(tick_at(&mut state, &mut audio, 1.5), ConductorStatus::Playing);
        assert!(state.active_hold(Lane::Lane1).is_some());
        assert_eq!(tick_at(&mut state, &mut audio, 3.5), ConductorStatus::Finished);
        assert_eq!(state.tally().perfect(), 1);
    }

    #[test]
    fn backwards_device_time_is_survived() {
        let (mut state, mut audio) = session(vec![NoteEvent::tap(4.0, Lane::Lane1)], 1.0);
        tick_at(&mut state, &mut audio, 0.0);
        tick_at(&mut state, &mut audio, 1.0);
        let beats = state.clock.song_position_in_beats();
        audio.set_dsp_time(0.5);
        update(&mut state, &mut audio, &field());
        assert_eq!(state.clock.song_position_in_beats(), beats);
        assert_eq!(state.summary().clock_desyncs, 1);
    }

    /// Random maps with chords and holds, played by autoplay except for one
    /// lane that is never touched. Checks the scheduling and resolution
    /// properties over the whole session.
    #[test]
    fn every_note_spawns_once_and_resolves_once_in_lane_order() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        for _ in 0..8 {
            let mut notes = Vec::new();
            let mut beat = 0.0_f32;
            while beat < 40.0 {
                let chord_size = rng.random_range(1..=3);
                let mut lanes = Lane::ALL.to_vec();
                for _ in 0..chord_size {
                    let lane = lanes.remove(rng.random_range(0..lanes.len()));
                    if rng.random_bool(0.15) {
                        notes.push(NoteEvent::held(beat, beat + 1.5, lane));
                    } else {
                        notes.push(NoteEvent::tap(beat, lane));
                    }
                }
                // Holds block their lane for two beats, so step past them.
                beat += if notes.iter().any(|n| n.is_held() && n.end_beat > beat) {
                    2.0
                } else {
                    0.5
                };
            }
            let note_count = notes.len();
            let mut map = Beatmap::new(120.0, 0.0, notes);
            map.song_length = 22.0;
            let mut state = init(map, &config(2.0)).unwrap();
            let mut audio = SimulatedAudio::new(22.0);
            let field = field();

            let mut all_events = Vec::new();
            let mut last_cursor = 0;
            let mut dsp = 0.0;
            while state.status() != ConductorStatus::Finished {
                audio.advance(1.0 / 60.0);
                dsp += 1.0 / 60.0;
                update(&mut state, &mut audio, &field);
                assert!(state.note_spawn_cursor() >= last_cursor, "cursor moved backwards");
                last_cursor = state.note_spawn_cursor();

                let events = state.drain_events();
                // Chords are never split across ticks.
                let tick_beats: Vec<f32> = events
                    .iter()
                    .filter_map(|e| match e {
                        SessionEvent::Spawned { beat, .. } => Some(*beat),
                        _ => None,
                    })
                    .collect();
                if let Some(&last) = tick_beats.last() {
                    let next = state.beatmap.notes.get(state.note_spawn_cursor());
                    assert!(next.is_none_or(|n| n.beat != last), "chord at beat {last} split");
                }
                all_events.extend(events);

                queue_autoplay_inputs(&mut state);
                // Lane 4 is left to time out.
                state.pending_edges.retain(|e| e.lane != Lane::Lane4);
                assert!(dsp < 120.0, "session never finished");
            }

            let spawned = spawned_ids(&all_events);
            assert_eq!(spawned.len(), note_count);
            let mut seen = spawned.clone();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), note_count, "a note spawned twice");

            let judged = judgments(&all_events);
            assert_eq!(judged.len(), note_count);
            let mut per_note: HashMap<NoteId, u32> = HashMap::new();
            for j in &judged {
                *per_note.entry(j.note).or_default() += 1;
            }
            assert!(per_note.values().all(|&n| n == 1), "a note was resolved twice");
            assert_eq!(state.tally().total() as usize, note_count);

            for lane in Lane::ALL {
                let spawn_order: Vec<NoteId> = all_events
                    .iter()
                    .filter_map(|e| match e {
                        SessionEvent::Spawned { note, lane: l, .. } if *l == lane => Some(*note),
                        _ => None,
                    })
                    .collect();
                let resolve_order: Vec<NoteId> =
                    judged.iter().filter(|j| j.lane == lane).map(|j| j.note).collect();
                if lane == Lane::Lane4 {
                    assert!(judged
                        .iter()
                        .filter(|j| j.lane == lane)
                        .all(|j| j.resolution == Resolution::TimedOut));
                }
                // Holds resolve on release, after later taps may have been
                // judged (see tap_behind_an_active_hold_resolves_before_it).
                let taps = |ids: &[NoteId]| -> Vec<NoteId> {
                    ids.iter()
                        .copied()
                        .filter(|id| !state.note(*id).unwrap().is_held())
                        .collect()
                };
                assert_eq!(taps(&resolve_order), taps(&spawn_order), "{lane:?} out of order");
            }
            assert!(state.lanes().is_empty());
            assert!(state.spawned_notes().iter().all(|n| n.resolved && n.handled));
        }
    }
}
