use crate::core::input::Lane;
use crate::game::note::NoteId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HitScore {
    Perfect,
    Good,
    Okay,
    Miss,
}

impl HitScore {
    pub const ALL: [HitScore; 4] = [HitScore::Perfect, HitScore::Good, HitScore::Okay, HitScore::Miss];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Perfect => "Perfect",
            Self::Good => "Good",
            Self::Okay => "Okay",
            Self::Miss => "Miss",
        }
    }
}

/// How a note left play.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// A press (or a completed hold) graded the note.
    Hit,
    /// A held note was released before its end beat.
    LetGo,
    /// The note scrolled past the offscreen threshold without being handled.
    TimedOut,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Judgment {
    pub note: NoteId,
    pub lane: Lane,
    pub score: HitScore,
    // |beats| between the press and the note's target beat; None for timeouts.
    pub distance_beats: Option<f32>,
    pub resolution: Resolution,
}

/// Judgment windows, in beats either side of the target beat.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeOffsets {
    pub perfect: f32,
    pub good: f32,
    pub okay: f32,
}

impl Default for JudgeOffsets {
    fn default() -> Self {
        Self {
            perfect: 0.05,
            good: 0.15,
            okay: 0.3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeOffsetsError {
    #[error("judge offsets must be finite and non-negative (perfect {perfect}, good {good}, okay {okay})")]
    NotFinite { perfect: f32, good: f32, okay: f32 },

    #[error("judge offsets must be strictly increasing: perfect {perfect} < good {good} < okay {okay}")]
    NotIncreasing { perfect: f32, good: f32, okay: f32 },
}

impl JudgeOffsets {
    pub fn validate(&self) -> Result<(), JudgeOffsetsError> {
        let Self { perfect, good, okay } = *self;
        if [perfect, good, okay].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(JudgeOffsetsError::NotFinite { perfect, good, okay });
        }
        if !(perfect < good && good < okay) {
            return Err(JudgeOffsetsError::NotIncreasing { perfect, good, okay });
        }
        Ok(())
    }

    /// Grades a distance to the target beat. Windows are inclusive and the
    /// tightest matching window wins.
    #[inline(always)]
    pub fn classify(&self, distance_beats: f32) -> HitScore {
        let d = distance_beats.abs();
        if d <= self.perfect {
            HitScore::Perfect
        } else if d <= self.good {
            HitScore::Good
        } else if d <= self.okay {
            HitScore::Okay
        } else {
            HitScore::Miss
        }
    }
}

/// Distance between the current scroll position and a note's target beat.
/// `song_position_in_beats` already includes the look-ahead, so it is
/// subtracted back out here.
#[inline(always)]
pub fn distance_to_target(song_position_in_beats: f32, note_beat: f32, beats_shown_in_advance: f32) -> f32 {
    (song_position_in_beats - note_beat - beats_shown_in_advance).abs()
}
