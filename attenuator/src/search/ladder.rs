use tracing::trace;

use super::{Candidate, ConfigMode, SearchResult, select};

/// Number of choices per blade: each working filter plus "open".
fn radices(blade_transmissions: &[Vec<f64>]) -> Vec<usize> {
    blade_transmissions.iter().map(|b| b.len() + 1).collect()
}

/// Transmission of every combination of one choice per blade.
///
/// Combinations are numbered in mixed radix with the first blade most
/// significant; digit 0 is "open" (transmission 1) and digit `n` selects
/// filter `n - 1` of that blade. Blades without filters only have digit 0.
pub fn ladder_transmission_table(blade_transmissions: &[Vec<f64>]) -> Vec<f64> {
    let mut table = vec![1.0];
    for blade in blade_transmissions {
        let mut next = Vec::with_capacity(table.len() * (blade.len() + 1));
        for &partial in &table {
            next.push(partial);
            next.extend(blade.iter().map(|t| partial * t));
        }
        table = next;
    }
    table
}

fn decode(mut config: usize, radices: &[usize]) -> Vec<Option<usize>> {
    let mut states = vec![None; radices.len()];
    for (state, radix) in states.iter_mut().zip(radices).rev() {
        let digit = config % radix;
        config /= radix;
        *state = digit.checked_sub(1);
    }
    states
}

/// Best choice of at most one filter per blade.
///
/// Returns, per blade, the index into that blade's transmission list, or
/// `None` for a blade left open.
pub fn get_ladder_config(
    blade_transmissions: &[Vec<f64>],
    t_des: f64,
    mode: ConfigMode,
) -> SearchResult<Vec<Option<usize>>> {
    let table: Vec<Candidate> = ladder_transmission_table(blade_transmissions)
        .into_iter()
        .enumerate()
        .map(|(config, transmission)| Candidate {
            transmission,
            config,
        })
        .collect();

    trace!(configurations = table.len(), t_des, %mode, "Searching ladder table");
    let best = select(table, t_des, mode);

    SearchResult {
        filter_states: decode(best.config, &radices(blade_transmissions)),
        transmission: best.transmission,
        error: best.transmission - t_des,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{descriptor::tests::at1k4, transmission::tests::model};
    use proptest::prelude::*;

    fn at1k4_transmissions(energy: f64) -> Vec<Vec<f64>> {
        let model = model();
        at1k4()
            .blades
            .iter()
            .map(|blade| {
                blade
                    .filters
                    .iter()
                    .map(|f| model.transmission(&f.material, f.thickness_um * 1e-6, energy).unwrap())
                    .collect()
            })
            .collect()
    }

    fn chosen_product(blades: &[Vec<f64>], states: &[Option<usize>]) -> f64 {
        blades
            .iter()
            .zip(states)
            .fold(1.0, |acc, (blade, state)| match state {
                Some(idx) => acc * blade[*idx],
                None => acc,
            })
    }

    #[test]
    fn table_is_cartesian_product() {
        let blades = vec![vec![0.5, 0.25], vec![], vec![0.9]];
        let table = ladder_transmission_table(&blades);
        assert_eq!(table, vec![1.0, 0.9, 0.5, 0.45, 0.25, 0.225]);
    }

    #[test]
    fn decodes_choices() {
        let radices = [3, 1, 2];
        assert_eq!(decode(0, &radices), vec![None, None, None]);
        assert_eq!(decode(3, &radices), vec![Some(0), None, Some(0)]);
        assert_eq!(decode(4, &radices), vec![Some(1), None, None]);
    }

    #[test]
    fn picks_one_per_blade() {
        let blades = vec![vec![0.9, 0.5], vec![0.2]];
        let conf = get_ladder_config(&blades, 0.3, ConfigMode::Floor);
        assert_eq!(conf.filter_states, vec![None, Some(0)]);
        assert_eq!(conf.transmission, 0.2);

        let conf = get_ladder_config(&blades, 0.3, ConfigMode::Ceiling);
        assert_eq!(conf.filter_states, vec![Some(1), None]);
        assert_eq!(conf.transmission, 0.5);
    }

    #[test]
    fn blades_without_filters_stay_open() {
        let conf = get_ladder_config(&[vec![], vec![]], 0.1, ConfigMode::Floor);
        assert_eq!(conf.filter_states, vec![None, None]);
        assert_eq!(conf.transmission, 1.0);

        let conf = get_ladder_config(&[], 0.1, ConfigMode::Ceiling);
        assert!(conf.filter_states.is_empty());
        assert_eq!(conf.transmission, 1.0);
    }

    #[test]
    fn at1k4_results_come_from_the_table() {
        for energy in [1000.0, 2500.0, 4500.0] {
            let blades = at1k4_transmissions(energy);
            let table = ladder_transmission_table(&blades);
            assert_eq!(table.len(), 9 * 5 * 4 * 5);

            for mode in [ConfigMode::Floor, ConfigMode::Ceiling] {
                for step in 0..=400 {
                    let t_des = step as f64 / 400.0;
                    let conf = get_ladder_config(&blades, t_des, mode);
                    assert!(table.contains(&conf.transmission));
                    assert_eq!(conf.transmission, chosen_product(&blades, &conf.filter_states));
                    assert_eq!(conf, get_ladder_config(&blades, t_des, mode));
                }
            }
        }
    }

    proptest! {
        #[test]
        fn table_matches_exhaustive_product(
            blades in prop::collection::vec(prop::collection::vec(0.01f64..0.99, 0..=4), 0..=4),
            t_des in 0.0f64..=1.0,
            ceiling in any::<bool>(),
        ) {
            let table = ladder_transmission_table(&blades);
            let radices = radices(&blades);
            prop_assert_eq!(table.len(), radices.iter().product::<usize>());
            for (config, value) in table.iter().enumerate() {
                prop_assert_eq!(*value, chosen_product(&blades, &decode(config, &radices)));
            }

            let mode = if ceiling { ConfigMode::Ceiling } else { ConfigMode::Floor };
            let conf = get_ladder_config(&blades, t_des, mode);
            prop_assert!(table.contains(&conf.transmission));

            let min = table.iter().copied().fold(f64::INFINITY, f64::min);
            match mode {
                ConfigMode::Floor if t_des >= min => prop_assert!(conf.transmission <= t_des + 1e-12),
                ConfigMode::Floor => prop_assert_eq!(conf.transmission, min),
                ConfigMode::Ceiling => prop_assert!(conf.transmission >= t_des - 1e-12),
            }
        }
    }
}
