//! Configuration search.
//!
//! Every variant builds the full table of achievable transmissions, sorts
//! it, finds the entry closest to the desired transmission and then picks
//! the floor or ceiling candidate next to it. Tables are small enough
//! (bounded by [`crate::descriptor::MAX_BITMASK_FILTERS`] and
//! [`crate::descriptor::MAX_LADDER_CONFIGURATIONS`]) that no pruning is
//! needed.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod bitmask;
pub mod ladder;
pub mod priority;

pub use bitmask::{get_best_config, transmission_table};
pub use ladder::{get_ladder_config, ladder_transmission_table};
pub use priority::get_best_config_with_material_priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum ConfigMode {
    /// Highest transmission not above the desired one.
    #[default]
    Floor,
    /// Lowest transmission not below the desired one.
    Ceiling,
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Floor => write!(f, "Floor"),
            Self::Ceiling => write!(f, "Ceiling"),
        }
    }
}

impl FromStr for ConfigMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "floor" => Ok(Self::Floor),
            "ceiling" => Ok(Self::Ceiling),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<S> {
    pub filter_states: S,
    pub transmission: f64,
    /// `transmission - t_des`.
    pub error: f64,
}

/// One row of a transmission table. `config` identifies the configuration
/// in whatever encoding the variant uses.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub transmission: f64,
    pub config: usize,
}

/// Sort by transmission; ties keep the lower configuration first so the
/// result does not depend on sort stability.
pub(crate) fn sort_candidates(table: &mut [Candidate]) {
    table.sort_unstable_by(|a, b| {
        a.transmission
            .total_cmp(&b.transmission)
            .then(a.config.cmp(&b.config))
    });
}

/// Floor and ceiling positions in a sorted, non-empty table.
///
/// The neighbour of the closest entry is taken from the next distinct
/// transmission value and clamped to the ends of the table. When nothing
/// lies on the requested side of `t_des` the extreme entry is returned, so a
/// floor can be above `t_des` (and a ceiling below it) only when no
/// configuration exists on that side.
pub(crate) fn bracket(sorted: &[Candidate], t_des: f64) -> (usize, usize) {
    let last = sorted.len() - 1;

    let mut closest = 0;
    let mut best = f64::INFINITY;
    for (idx, candidate) in sorted.iter().enumerate() {
        let distance = (candidate.transmission - t_des).abs();
        if distance < best {
            best = distance;
            closest = idx;
        }
    }

    let t_closest = sorted[closest].transmission;
    if t_closest == t_des {
        (closest, closest)
    } else if t_closest < t_des {
        let above = sorted[closest..]
            .iter()
            .position(|c| c.transmission > t_closest)
            .map_or(last, |offset| closest + offset);
        (closest, above)
    } else {
        let below = match closest.checked_sub(1) {
            Some(idx) => run_start(sorted, idx),
            None => 0,
        };
        (below, closest)
    }
}

/// First index of the run of equal transmissions containing `idx`.
fn run_start(sorted: &[Candidate], mut idx: usize) -> usize {
    let value = sorted[idx].transmission;
    while idx > 0 && sorted[idx - 1].transmission == value {
        idx -= 1;
    }
    idx
}

/// Sorts `table` and returns the candidate for `mode`.
pub(crate) fn select(mut table: Vec<Candidate>, t_des: f64, mode: ConfigMode) -> Candidate {
    debug_assert!(!table.is_empty());
    sort_candidates(&mut table);
    let (floor, ceiling) = bracket(&table, t_des);
    match mode {
        ConfigMode::Floor => table[floor],
        ConfigMode::Ceiling => table[ceiling],
    }
}
