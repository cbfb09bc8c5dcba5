use crate::core::input::{LANE_COUNT, Lane};
use crate::game::note::NoteId;
use log::{debug, warn};
use rand::Rng;
use rand::seq::IndexedRandom;
use smallvec::SmallVec;
use std::collections::VecDeque;

/* ------------------------------ Lane queues ------------------------------ */

/// One FIFO per lane of spawned, unresolved notes, in spawn order.
///
/// The head of a lane is the only note that can be judged or timed out; the
/// input path and the timeout sweep both leave through [`LaneQueues::pop_head`].
#[derive(Clone, Debug, Default)]
pub struct LaneQueues {
    lanes: [VecDeque<NoteId>; LANE_COUNT],
}

impl LaneQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, lane: Lane, id: NoteId) {
        let queue = &mut self.lanes[lane.index()];
        debug_assert!(!queue.contains(&id), "note {id:?} queued twice on {lane:?}");
        queue.push_back(id);
    }

    #[inline(always)]
    pub fn head(&self, lane: Lane) -> Option<NoteId> {
        self.lanes[lane.index()].front().copied()
    }

    /// Removes the head of `lane`. Popping an empty lane is a caller bug.
    pub fn pop_head(&mut self, lane: Lane) -> Option<NoteId> {
        let popped = self.lanes[lane.index()].pop_front();
        debug_assert!(popped.is_some(), "dequeue from empty {lane:?}");
        popped
    }

    #[inline(always)]
    pub fn len(&self, lane: Lane) -> usize {
        self.lanes[lane.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn iter_lane(&self, lane: Lane) -> impl Iterator<Item = NoteId> + '_ {
        self.lanes[lane.index()].iter().copied()
    }

    /// Empties every lane, returning what was still queued.
    pub fn drain_all(&mut self) -> Vec<NoteId> {
        self.lanes.iter_mut().flat_map(|q| q.drain(..)).collect()
    }
}

/* ----------------------------- Lane registry ----------------------------- */

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneStatus {
    pub lane: Lane,
    pub can_spawn_notes: bool,
    // Beat at which a blocked lane opens up again, if known.
    pub beat_till_can_spawn: f32,
}

/// Tracks which lanes are open for new notes while a beatmap is being
/// authored. Sessions never consult it; a note's lane is fixed in the map.
#[derive(Clone, Debug)]
pub struct LaneRegistry {
    statuses: [LaneStatus; LANE_COUNT],
}

impl Default for LaneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneRegistry {
    pub fn new() -> Self {
        Self {
            statuses: Lane::ALL.map(|lane| LaneStatus {
                lane,
                can_spawn_notes: true,
                beat_till_can_spawn: 0.0,
            }),
        }
    }

    pub fn statuses(&self) -> &[LaneStatus; LANE_COUNT] {
        &self.statuses
    }

    #[inline(always)]
    pub fn status(&self, lane: Lane) -> &LaneStatus {
        &self.statuses[lane.index()]
    }

    pub fn available_lanes(&self) -> SmallVec<[Lane; LANE_COUNT]> {
        self.statuses
            .iter()
            .filter(|s| s.can_spawn_notes)
            .map(|s| s.lane)
            .collect()
    }

    pub fn update_lane_status(&mut self, lane: Lane, can_spawn: bool) {
        self.statuses[lane.index()].can_spawn_notes = can_spawn;
        debug!("Lane {} can_spawn={can_spawn}", lane.number());
    }

    /// Closes `lane` until `beat`, e.g. for the length of a held note.
    pub fn block_until(&mut self, lane: Lane, beat: f32) {
        let status = &mut self.statuses[lane.index()];
        status.can_spawn_notes = false;
        status.beat_till_can_spawn = beat;
    }

    /// Reopens every blocked lane whose block has expired at `beat`.
    pub fn release_expired(&mut self, beat: f32) {
        for status in &mut self.statuses {
            if !status.can_spawn_notes && status.beat_till_can_spawn <= beat {
                status.can_spawn_notes = true;
            }
        }
    }

    /// Picks a random open lane; `None` when every lane is blocked.
    pub fn random_lane<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Lane> {
        let available = self.available_lanes();
        let picked = available.choose(rng).copied();
        if picked.is_none() {
            warn!("No lanes available to spawn into.");
        }
        picked
    }
}
