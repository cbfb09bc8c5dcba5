use crate::game::judgment::HitScore;
use chrono::{DateTime, Local};
use serde::Serialize;

/// Per-grade counters for one session.
///
/// Counts only ever go up, and [`ScoreTally::record`] is the only way to move
/// them. The session calls it exactly once per resolved note.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScoreTally {
    counts: [u32; 4],
}

impl ScoreTally {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn record(&mut self, score: HitScore) {
        self.counts[score.index()] += 1;
    }

    #[inline(always)]
    pub fn count(&self, score: HitScore) -> u32 {
        self.counts[score.index()]
    }

    pub fn perfect(&self) -> u32 {
        self.count(HitScore::Perfect)
    }

    pub fn good(&self) -> u32 {
        self.count(HitScore::Good)
    }

    pub fn okay(&self) -> u32 {
        self.count(HitScore::Okay)
    }

    pub fn miss(&self) -> u32 {
        self.count(HitScore::Miss)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// Fraction of resolved notes that were hit at all (0.0 when nothing resolved).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(total - self.miss()) / f64::from(total)
    }
}

impl std::fmt::Display for ScoreTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Perfect {} Good {} Okay {} Missed {}",
            self.perfect(),
            self.good(),
            self.okay(),
            self.miss()
        )
    }
}

/// What a finished session reports to the host.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub map_name: String,
    pub tally: ScoreTally,
    pub total_notes: usize,
    pub clock_desyncs: u32,
    pub played_at: DateTime<Local>,
}
