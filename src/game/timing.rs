use crate::core::audio::sanitize_pitch;
use crate::game::note::ScrollTiming;
use log::{debug, warn};
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ConductorStatus {
    Countdown,
    Playing,
    Paused,
    Finished,
}

impl ConductorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Countdown => "Countdown",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CountdownTick {
    /// Still counting, no new step this tick.
    Waiting,
    /// A new count was reached (3, 2, 1 ...).
    Step(u32),
    /// The lead-in is over; playback should start now.
    Done,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CountdownSettings {
    pub steps: u32,
    pub step_seconds: f64,
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            steps: 3,
            step_seconds: 1.0,
        }
    }
}

/// Converts device time into song position and beats.
///
/// `song_position` is seconds since beat 0 scaled by pitch. While paused the
/// clock holds its last value, and device time that passes during a pause is
/// excluded from the position so resuming never skips beats. A device clock
/// that runs backwards is clamped instead of moving the song backwards.
#[derive(Clone, Debug)]
pub struct BeatClock {
    status: ConductorStatus,
    bpm: f32,
    tempo: f32,
    start_offset: f64,
    beats_shown_in_advance: f32,
    countdown: CountdownSettings,
    countdown_started_at: Option<f64>,
    countdown_reported: u32,
    dsp_song_start: f64,
    paused_at: Option<f64>,
    paused_total: f64,
    song_position: f32,
    song_position_in_beats: f32,
    desync_count: u32,
}

impl BeatClock {
    pub fn new(bpm: f32, start_offset: f32, beats_shown_in_advance: f32, countdown: CountdownSettings) -> Self {
        let tempo = 60.0 / bpm;
        let song_position = -start_offset;
        Self {
            status: ConductorStatus::Countdown,
            bpm,
            tempo,
            start_offset: f64::from(start_offset),
            beats_shown_in_advance,
            countdown,
            countdown_started_at: None,
            countdown_reported: 0,
            dsp_song_start: 0.0,
            paused_at: None,
            paused_total: 0.0,
            song_position,
            song_position_in_beats: song_position / tempo + beats_shown_in_advance,
            desync_count: 0,
        }
    }

    #[inline(always)]
    pub fn status(&self) -> ConductorStatus {
        self.status
    }

    #[inline(always)]
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Seconds per beat.
    #[inline(always)]
    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    #[inline(always)]
    pub fn song_position(&self) -> f32 {
        self.song_position
    }

    /// Song position in beats, shifted forward by the look-ahead.
    #[inline(always)]
    pub fn song_position_in_beats(&self) -> f32 {
        self.song_position_in_beats
    }

    /// The beat currently under the judgment line.
    #[inline(always)]
    pub fn current_beat(&self) -> f32 {
        self.song_position / self.tempo
    }

    #[inline(always)]
    pub fn beats_shown_in_advance(&self) -> f32 {
        self.beats_shown_in_advance
    }

    pub fn desync_count(&self) -> u32 {
        self.desync_count
    }

    pub fn scroll_timing(&self) -> ScrollTiming {
        ScrollTiming {
            song_position: self.song_position,
            tempo: self.tempo,
            beats_shown_in_advance: self.beats_shown_in_advance,
        }
    }

    /// Advances the lead-in. The first call anchors the countdown to `dsp_now`.
    pub fn tick_countdown(&mut self, dsp_now: f64) -> CountdownTick {
        if self.status != ConductorStatus::Countdown {
            return CountdownTick::Waiting;
        }
        let started_at = *self.countdown_started_at.get_or_insert(dsp_now);
        let steps = self.countdown.steps;
        let step_seconds = self.countdown.step_seconds.max(0.0);
        let elapsed = (dsp_now - started_at).max(0.0);

        let passed = if step_seconds > 0.0 {
            (elapsed / step_seconds).floor() as u64
        } else {
            u64::from(steps)
        };
        if passed >= u64::from(steps) {
            return CountdownTick::Done;
        }

        // Steps shown so far, counting the one displayed right away.
        let shown = passed as u32 + 1;
        if shown > self.countdown_reported {
            self.countdown_reported = shown;
            return CountdownTick::Step(steps - passed as u32);
        }
        CountdownTick::Waiting
    }

    /// Anchors beat 0 to `dsp_now` and switches to `Playing`.
    pub fn start_playback(&mut self, dsp_now: f64, pitch: f32) {
        self.dsp_song_start = dsp_now;
        self.paused_total = 0.0;
        self.paused_at = None;
        self.status = ConductorStatus::Playing;
        self.set_position((-self.start_offset * f64::from(sanitize_pitch(pitch))) as f32);
        debug!(
            "Playback anchored at dsp {dsp_now:.3}s (offset {:.3}s, tempo {:.4}s/beat).",
            self.start_offset, self.tempo
        );
    }

    /// Samples the device clock. Only moves while `Playing`; returns the
    /// (possibly unchanged) song position in beats.
    pub fn sample(&mut self, dsp_now: f64, pitch: f32) -> f32 {
        if self.status != ConductorStatus::Playing {
            return self.song_position_in_beats;
        }
        let elapsed = dsp_now - self.dsp_song_start - self.paused_total - self.start_offset;
        let position = (elapsed * f64::from(sanitize_pitch(pitch))) as f32;
        if position < self.song_position {
            self.desync_count += 1;
            warn!(
                "Audio clock went backwards ({:.4}s -> {:.4}s); holding position.",
                self.song_position, position
            );
            return self.song_position_in_beats;
        }
        self.set_position(position);
        self.song_position_in_beats
    }

    /// `Playing -> Paused`. Returns false when not playing.
    pub fn pause(&mut self, dsp_now: f64) -> bool {
        if self.status != ConductorStatus::Playing {
            return false;
        }
        self.paused_at = Some(dsp_now);
        self.status = ConductorStatus::Paused;
        true
    }

    /// `Paused -> Playing`. Returns false when not paused.
    pub fn resume(&mut self, dsp_now: f64) -> bool {
        if self.status != ConductorStatus::Paused {
            return false;
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += (dsp_now - paused_at).max(0.0);
        }
        self.status = ConductorStatus::Playing;
        true
    }

    pub fn finish(&mut self) {
        self.paused_at = None;
        self.status = ConductorStatus::Finished;
    }

    #[inline(always)]
    fn set_position(&mut self, position: f32) {
        self.song_position = position;
        self.song_position_in_beats = position / self.tempo + self.beats_shown_in_advance;
    }
}
