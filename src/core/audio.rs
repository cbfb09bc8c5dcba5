use log::{debug, info};

/* ============================== Public API ============================== */

/// The audio playback collaborator the conductor is synchronized to.
///
/// `dsp_time` is the device clock: monotonic, in seconds, and it keeps running
/// while music is paused. The conductor does its own pause bookkeeping on top
/// of it, so implementations only need to forward transport commands to the
/// real output stream.
pub trait AudioClock {
    /// Current device time in seconds.
    fn dsp_time(&self) -> f64;

    /// Playback rate applied to the music (1.0 = normal).
    fn pitch(&self) -> f32;

    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);

    /// True once the music track has played through to its end.
    fn has_finished(&self) -> bool;
}

#[inline(always)]
pub fn sanitize_pitch(pitch: f32) -> f32 {
    if pitch.is_finite() && pitch > 0.0 { pitch } else { 1.0 }
}

/* ========================= Scripted device clock ========================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Stopped,
    Playing,
    Paused,
}

/// A scripted device clock for headless runs and tests. Device time only
/// moves when the host calls [`SimulatedAudio::advance`]; the music position
/// only moves while playing.
#[derive(Clone, Debug)]
pub struct SimulatedAudio {
    dsp_time: f64,
    pitch: f32,
    track_length: f64,
    played: f64,
    transport: Transport,
}

impl SimulatedAudio {
    pub fn new(track_length: f64) -> Self {
        Self {
            dsp_time: 0.0,
            pitch: 1.0,
            track_length: track_length.max(0.0),
            played: 0.0,
            transport: Transport::Stopped,
        }
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = sanitize_pitch(pitch);
        self
    }

    /// Moves the device clock forward by `seconds`.
    pub fn advance(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.dsp_time += seconds;
        if self.transport == Transport::Playing {
            self.played += seconds * f64::from(self.pitch);
        }
    }

    /// Forces the device clock to an arbitrary value, including backwards.
    /// Only meant for reproducing device clock anomalies.
    pub fn set_dsp_time(&mut self, dsp_time: f64) {
        self.dsp_time = dsp_time;
    }

    pub fn is_playing(&self) -> bool {
        self.transport == Transport::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.transport == Transport::Paused
    }

    pub fn music_position(&self) -> f64 {
        self.played
    }
}

impl AudioClock for SimulatedAudio {
    fn dsp_time(&self) -> f64 {
        self.dsp_time
    }

    fn pitch(&self) -> f32 {
        self.pitch
    }

    fn play(&mut self) {
        info!("Music started ({:.2}s track, rate {:.2}).", self.track_length, self.pitch);
        self.played = 0.0;
        self.transport = Transport::Playing;
    }

    fn pause(&mut self) {
        if self.transport == Transport::Playing {
            debug!("Music paused at {:.3}s.", self.played);
            self.transport = Transport::Paused;
        }
    }

    fn resume(&mut self) {
        if self.transport == Transport::Paused {
            debug!("Music resumed at {:.3}s.", self.played);
            self.transport = Transport::Playing;
        }
    }

    fn stop(&mut self) {
        self.transport = Transport::Stopped;
    }

    fn has_finished(&self) -> bool {
        self.transport != Transport::Paused && self.played >= self.track_length
    }
}
