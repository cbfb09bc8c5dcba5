use serde::{Deserialize, Serialize};

pub const LANE_COUNT: usize = 4;

/// The lane a note falls into and a press lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lane {
    Lane1 = 0,
    Lane2 = 1,
    Lane3 = 2,
    Lane4 = 3,
}

impl Lane {
    pub const ALL: [Lane; LANE_COUNT] = [Lane::Lane1, Lane::Lane2, Lane::Lane3, Lane::Lane4];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Lane1),
            1 => Some(Self::Lane2),
            2 => Some(Self::Lane3),
            3 => Some(Self::Lane4),
            _ => None,
        }
    }

    /// One-based lane number, as printed on the board (1..=4).
    #[inline(always)]
    pub const fn from_number(number: u8) -> Option<Self> {
        if number == 0 {
            return None;
        }
        Self::from_index(number as usize - 1)
    }

    #[inline(always)]
    pub const fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Lane across the board: 1 <-> 3, 2 <-> 4.
    #[inline(always)]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Lane1 => Self::Lane3,
            Self::Lane2 => Self::Lane4,
            Self::Lane3 => Self::Lane1,
            Self::Lane4 => Self::Lane2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEdge {
    pub lane: Lane,
    pub pressed: bool,
}
