use tracing::trace;

use super::{Candidate, ConfigMode, SearchResult, select};

/// Transmission of every insertion subset. Entry `mask` is the product of
/// the filters whose bit is set in `mask`, multiplied in ascending filter
/// order; retracted filters contribute nothing.
pub fn transmission_table(transmissions: &[f64]) -> Vec<f64> {
    let mut table = Vec::with_capacity(1 << transmissions.len());
    table.push(1.0);
    for &t in transmissions {
        let len = table.len();
        for mask in 0..len {
            let value = table[mask] * t;
            table.push(value);
        }
    }
    table
}

pub(crate) fn mask_to_states(mask: usize, len: usize) -> Vec<bool> {
    (0..len).map(|bit| mask & (1 << bit) != 0).collect()
}

pub(crate) fn mask_product(transmissions: &[f64], mask: usize) -> f64 {
    transmissions
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .fold(1.0, |acc, (_, t)| acc * t)
}

/// Best insertion subset of independently insertable filters.
///
/// An empty `transmissions` yields the empty configuration with
/// transmission 1.
pub fn get_best_config(transmissions: &[f64], t_des: f64, mode: ConfigMode) -> SearchResult<Vec<bool>> {
    let table: Vec<Candidate> = transmission_table(transmissions)
        .into_iter()
        .enumerate()
        .map(|(config, transmission)| Candidate {
            transmission,
            config,
        })
        .collect();

    trace!(configurations = table.len(), t_des, %mode, "Searching bitmask table");
    let best = select(table, t_des, mode);

    SearchResult {
        filter_states: mask_to_states(best.config, transmissions.len()),
        transmission: best.transmission,
        error: best.transmission - t_des,
    }
}
