use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical position of a blade as reported by its motor.
///
/// Raw controller values: `0` moving, `1` out, `2 + n` filter slot `n`
/// inserted. Anything else is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BladeState {
    Unknown,
    Moving,
    Out,
    In(usize),
}

impl BladeState {
    const RAW_MOVING: i64 = 0;
    const RAW_OUT: i64 = 1;
    const RAW_FIRST_SLOT: i64 = 2;

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            Self::RAW_MOVING => Self::Moving,
            Self::RAW_OUT => Self::Out,
            n if n >= Self::RAW_FIRST_SLOT => Self::In((n - Self::RAW_FIRST_SLOT) as usize),
            _ => Self::Unknown,
        }
    }

    pub fn raw(&self) -> i64 {
        match self {
            Self::Unknown => -1,
            Self::Moving => Self::RAW_MOVING,
            Self::Out => Self::RAW_OUT,
            Self::In(slot) => Self::RAW_FIRST_SLOT + *slot as i64,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::In(slot) => Some(*slot),
            _ => None,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::In(_))
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Moving)
    }
}

impl fmt::Display for BladeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Moving => write!(f, "Moving"),
            Self::Out => write!(f, "Out"),
            Self::In(slot) => write!(f, "In_{:02}", slot + 1),
        }
    }
}
