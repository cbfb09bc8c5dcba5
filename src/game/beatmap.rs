use crate::core::input::Lane;
use crate::game::note::NoteId;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// The style of pattern a note was authored as. Purely descriptive: the
/// scheduler only cares whether a note is held (see [`NoteEvent::is_held`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteType {
    #[default]
    Normal,
    LongNote,
    Staircase,
    Jackhammer,
    Chord,
    Burst,
    Roll,
    Shield,
    ChordJack,
    Trill,
    ChordTrill,
    JumpStream,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub beat: f32,
    // <= 0 for a tap, otherwise the release beat of a held note.
    #[serde(default)]
    pub end_beat: f32,
    #[serde(default)]
    pub note_type: NoteType,
    pub lane: Lane,
    // Live instance while spawned; cleared once the note is resolved.
    #[serde(skip)]
    pub note: Option<NoteId>,
}

impl NoteEvent {
    pub fn tap(beat: f32, lane: Lane) -> Self {
        Self {
            beat,
            end_beat: 0.0,
            note_type: NoteType::Normal,
            lane,
            note: None,
        }
    }

    pub fn held(beat: f32, end_beat: f32, lane: Lane) -> Self {
        Self {
            beat,
            end_beat,
            note_type: NoteType::LongNote,
            lane,
            note: None,
        }
    }

    pub fn with_type(mut self, note_type: NoteType) -> Self {
        self.note_type = note_type;
        self
    }

    #[inline(always)]
    pub fn is_held(&self) -> bool {
        self.end_beat > 0.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Beatmap {
    #[serde(default)]
    pub map_name: String,
    #[serde(default)]
    pub song_artist: String,
    #[serde(default)]
    pub map_artist: String,
    #[serde(default)]
    pub map_description: String,
    pub bpm: f32,
    // Seconds of audio before beat 0.
    #[serde(default)]
    pub start_offset: f32,
    // Length of the music track in seconds.
    #[serde(default)]
    pub song_length: f32,
    #[serde(default)]
    pub notes: Vec<NoteEvent>,
}

/// A beatmap that cannot be played. Always reported before a session starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeatmapError {
    #[error("bpm must be a positive number, got {0}")]
    NonPositiveBpm(f32),

    #[error("start offset must be a non-negative number, got {0}")]
    NegativeStartOffset(f32),

    #[error("note {index} has invalid beat {beat}")]
    NegativeBeat { index: usize, beat: f32 },

    #[error("note {index} at beat {beat} comes after beat {previous}; notes must be sorted by beat")]
    UnsortedNotes { index: usize, beat: f32, previous: f32 },

    #[error("held note {index} ends at beat {end_beat}, which is not after its start beat {beat}")]
    HeldNoteEndsBeforeStart { index: usize, beat: f32, end_beat: f32 },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read beatmap '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed beatmap JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] BeatmapError),
}

impl Beatmap {
    pub fn new(bpm: f32, start_offset: f32, notes: Vec<NoteEvent>) -> Self {
        Self {
            bpm,
            start_offset,
            notes,
            ..Self::default()
        }
    }

    /// Seconds per beat.
    #[inline(always)]
    pub fn tempo(&self) -> f32 {
        60.0 / self.bpm
    }

    /// Whole beats that fit in the music track.
    pub fn total_beats(&self) -> u32 {
        if self.bpm <= 0.0 || !self.song_length.is_finite() || self.song_length <= 0.0 {
            return 0;
        }
        (self.song_length / self.tempo()).floor() as u32
    }

    pub fn held_note_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_held()).count()
    }

    pub fn validate(&self) -> Result<(), BeatmapError> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(BeatmapError::NonPositiveBpm(self.bpm));
        }
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err(BeatmapError::NegativeStartOffset(self.start_offset));
        }

        let mut previous = 0.0_f32;
        for (index, note) in self.notes.iter().enumerate() {
            if !note.beat.is_finite() || note.beat < 0.0 {
                return Err(BeatmapError::NegativeBeat { index, beat: note.beat });
            }
            if note.beat < previous {
                return Err(BeatmapError::UnsortedNotes {
                    index,
                    beat: note.beat,
                    previous,
                });
            }
            if note.is_held() && note.end_beat <= note.beat {
                return Err(BeatmapError::HeldNoteEndsBeforeStart {
                    index,
                    beat: note.beat,
                    end_beat: note.end_beat,
                });
            }
            previous = note.beat;
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let beatmap: Beatmap = serde_json::from_str(json)?;
        beatmap.validate()?;
        Ok(beatmap)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let beatmap = Self::from_json_str(&content)?;
        info!(
            "Loaded beatmap '{}' ({} notes, {} held, {:.1} BPM) from '{}'.",
            beatmap.map_name,
            beatmap.notes.len(),
            beatmap.held_note_count(),
            beatmap.bpm,
            path.display()
        );
        Ok(beatmap)
    }
}
