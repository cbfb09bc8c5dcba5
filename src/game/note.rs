use crate::core::input::{LANE_COUNT, Lane};
use crate::game::beatmap::{NoteEvent, NoteType};
use serde::{Deserialize, Serialize};

/// Handle to a spawned note inside a session's note arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub u32);

impl NoteId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Behavioral variant picked once at spawn time from the authored
/// [`NoteType`]. Everything downstream only distinguishes taps from holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteKind {
    Tap,
    Held { end_beat: f32 },
}

impl NoteKind {
    pub fn for_event(event: &NoteEvent) -> Self {
        if event.is_held() {
            Self::Held { end_beat: event.end_beat }
        } else {
            Self::Tap
        }
    }
}

#[derive(Clone, Debug)]
pub struct NoteInstance {
    pub id: NoteId,
    pub event_index: usize,
    pub beat: f32,
    pub lane: Lane,
    pub kind: NoteKind,
    pub note_type: NoteType,
    // Set exactly once, by whichever path judges the note first.
    pub handled: bool,
    pub resolved: bool,
}

impl NoteInstance {
    #[inline(always)]
    pub fn is_held(&self) -> bool {
        matches!(self.kind, NoteKind::Held { .. })
    }

    #[inline(always)]
    pub fn end_beat(&self) -> Option<f32> {
        match self.kind {
            NoteKind::Held { end_beat } => Some(end_beat),
            NoteKind::Tap => None,
        }
    }
}

/// Which screen axis notes travel along.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    /// Notes travel horizontally; the x coordinate is tested.
    #[default]
    Standard,
    /// Notes travel vertically; the y coordinate is tested.
    Arcade,
}

impl GameMode {
    #[inline(always)]
    pub const fn axis(self) -> usize {
        match self {
            Self::Standard => 0,
            Self::Arcade => 1,
        }
    }
}

/// Clock values the field needs to place a note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollTiming {
    pub song_position: f32,
    pub tempo: f32,
    pub beats_shown_in_advance: f32,
}

/// Position of a note along its travel axis.
///
/// The note sits at `start` when it is `beats_shown_in_advance` beats away from
/// its target beat, reaches `end` exactly on the beat and keeps moving past it
/// afterwards.
#[inline(always)]
pub fn note_axis_position(
    song_position: f32,
    tempo: f32,
    beat: f32,
    start: f32,
    end: f32,
    beats_shown_in_advance: f32,
) -> f32 {
    let beats_until_target = beat - song_position / tempo;
    start + (end - start) * (1.0 - beats_until_target / beats_shown_in_advance)
}

/// The rendering side of the board, as seen by the timeout sweep.
///
/// Notes travel towards decreasing coordinates: a note counts as gone once
/// its position is at or below the lane's offscreen position.
pub trait NoteField {
    /// Current position of `note` along the travel axis, or `None` when the
    /// note has no on-screen representation yet.
    fn note_position(&self, note: &NoteInstance, timing: &ScrollTiming) -> Option<f32>;

    fn offscreen_position(&self, lane: Lane) -> f32;
}

/// Lane geometry for one lane: where notes appear, where they should be hit
/// and where they leave the board. Coordinates are `[x, y]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneGeometry {
    pub start: [f32; 2],
    pub target: [f32; 2],
    pub offscreen: [f32; 2],
}

/// A board whose notes move in a straight line at constant beat speed.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearNoteField {
    pub mode: GameMode,
    pub lanes: [LaneGeometry; LANE_COUNT],
}

impl LinearNoteField {
    pub fn new(mode: GameMode, lanes: [LaneGeometry; LANE_COUNT]) -> Self {
        Self { mode, lanes }
    }

    /// Notes enter at 1.0, are hit at 0.0 and leave the board at
    /// `-offscreen_distance` on the active axis.
    pub fn uniform(mode: GameMode, offscreen_distance: f32) -> Self {
        let axis = mode.axis();
        let lanes = std::array::from_fn(|i| {
            let cross = i as f32;
            let mut start = [cross; 2];
            let mut target = [cross; 2];
            let mut offscreen = [cross; 2];
            start[axis] = 1.0;
            target[axis] = 0.0;
            offscreen[axis] = -offscreen_distance;
            LaneGeometry { start, target, offscreen }
        });
        Self { mode, lanes }
    }
}

impl NoteField for LinearNoteField {
    fn note_position(&self, note: &NoteInstance, timing: &ScrollTiming) -> Option<f32> {
        let axis = self.mode.axis();
        let lane = &self.lanes[note.lane.index()];
        Some(note_axis_position(
            timing.song_position,
            timing.tempo,
            note.beat,
            lane.start[axis],
            lane.target[axis],
            timing.beats_shown_in_advance,
        ))
    }

    fn offscreen_position(&self, lane: Lane) -> f32 {
        self.lanes[lane.index()].offscreen[self.mode.axis()]
    }
}
