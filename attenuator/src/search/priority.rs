use tracing::trace;

use super::{
    Candidate, ConfigMode, SearchResult,
    bitmask::{mask_product, mask_to_states},
    select,
};

/// Filter indices grouped by material, highest priority first. Materials
/// missing from `material_order` follow the listed ones in order of first
/// appearance.
fn priority_groups<M: AsRef<str>, O: AsRef<str>>(materials: &[M], material_order: &[O]) -> Vec<Vec<usize>> {
    let mut order: Vec<&str> = material_order.iter().map(AsRef::as_ref).collect();
    for material in materials {
        if !order.contains(&material.as_ref()) {
            order.push(material.as_ref());
        }
    }

    order
        .into_iter()
        .map(|wanted| {
            materials
                .iter()
                .enumerate()
                .filter(|(_, m)| m.as_ref() == wanted)
                .map(|(idx, _)| idx)
                .collect::<Vec<usize>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

/// Insertion subsets allowed by the priority rule: a material may only be
/// inserted once every filter of every higher priority material is.
fn allowed_masks(groups: &[Vec<usize>]) -> Vec<usize> {
    let mut masks = Vec::new();
    let mut all_higher = 0usize;

    for (level, group) in groups.iter().enumerate() {
        // The empty subset of a lower group equals the full subset of the
        // group above it, so it is only counted once.
        let first = if level == 0 { 0 } else { 1 };
        for subset in first..(1usize << group.len()) {
            let mask = group
                .iter()
                .enumerate()
                .filter(|(bit, _)| subset & (1 << bit) != 0)
                .fold(all_higher, |mask, (_, idx)| mask | (1 << idx));
            masks.push(mask);
        }
        all_higher = group.iter().fold(all_higher, |mask, idx| mask | (1 << idx));
    }

    if masks.is_empty() {
        masks.push(0);
    }
    masks
}

/// Like [`super::get_best_config`], restricted to configurations that honour
/// `material_order`: whenever a filter of some material is inserted, all
/// filters of the materials listed before it are inserted too.
pub fn get_best_config_with_material_priority<M: AsRef<str>, O: AsRef<str>>(
    materials: &[M],
    transmissions: &[f64],
    material_order: &[O],
    t_des: f64,
    mode: ConfigMode,
) -> SearchResult<Vec<bool>> {
    debug_assert_eq!(materials.len(), transmissions.len());

    let groups = priority_groups(materials, material_order);
    let table: Vec<Candidate> = allowed_masks(&groups)
        .into_iter()
        .map(|config| Candidate {
            transmission: mask_product(transmissions, config),
            config,
        })
        .collect();

    trace!(configurations = table.len(), groups = groups.len(), t_des, %mode, "Searching prioritized table");
    let best = select(table, t_des, mode);

    SearchResult {
        filter_states: mask_to_states(best.config, transmissions.len()),
        transmission: best.transmission,
        error: best.transmission - t_des,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmission::tests::model;
    use proptest::prelude::*;

    const DIAMOND_UM: [f64; 8] = [1280.0, 640.0, 320.0, 160.0, 80.0, 40.0, 20.0, 10.0];
    const SILICON_UM: [f64; 10] = [10240.0, 5120.0, 2560.0, 1280.0, 640.0, 320.0, 160.0, 80.0, 40.0, 20.0];

    fn filters(diamond: &[f64], silicon: &[f64], energy: f64) -> (Vec<&'static str>, Vec<f64>) {
        let model = model();
        let mut materials = Vec::new();
        let mut transmissions = Vec::new();
        for (material, thicknesses) in [("C", diamond), ("Si", silicon)] {
            for um in thicknesses {
                materials.push(material);
                transmissions.push(model.transmission(material, um * 1e-6, energy).unwrap());
            }
        }
        (materials, transmissions)
    }

    fn assert_priority(materials: &[&str], states: &[bool]) {
        let inserted: Vec<&str> = materials
            .iter()
            .zip(states)
            .filter(|(_, s)| **s)
            .map(|(m, _)| *m)
            .collect();
        if inserted.contains(&"Si") {
            let diamonds = materials.iter().filter(|m| **m == "C").count();
            assert_eq!(inserted.iter().filter(|m| **m == "C").count(), diamonds);
        }
    }

    #[test]
    fn enumerates_each_allowed_subset_once() {
        let groups = priority_groups(&["C", "Si", "C", "Si", "Si"], &["C", "Si"]);
        assert_eq!(groups, vec![vec![0, 2], vec![1, 3, 4]]);

        let masks = allowed_masks(&groups);
        // 2^2 diamond subsets plus 2^3 - 1 non-empty silicon subsets.
        assert_eq!(masks.len(), 4 + 7);
        let mut unique = masks.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), masks.len());
    }

    #[test]
    fn unlisted_materials_come_last() {
        let groups = priority_groups(&["Al", "Si", "C"], &["C"]);
        assert_eq!(groups, vec![vec![2], vec![0], vec![1]]);
    }

    #[test]
    fn silicon_only_after_all_diamond() {
        for energy in [6000.0, 9000.0, 12000.0, 20000.0] {
            for diamond in [&DIAMOND_UM[..], &DIAMOND_UM[1..], &DIAMOND_UM[..5]] {
                let (materials, transmissions) = filters(diamond, &SILICON_UM, energy);
                for mode in [ConfigMode::Floor, ConfigMode::Ceiling] {
                    for step in 0..=200 {
                        let t_des = step as f64 / 200.0;
                        let conf = get_best_config_with_material_priority(
                            &materials,
                            &transmissions,
                            &["C", "Si"],
                            t_des,
                            mode,
                        );
                        assert_priority(&materials, &conf.filter_states);
                    }
                }
            }
        }
    }

    #[test]
    fn single_material_matches_unrestricted_search() {
        let transmissions = [0.9, 0.5, 0.2];
        for mode in [ConfigMode::Floor, ConfigMode::Ceiling] {
            let restricted = get_best_config_with_material_priority(
                &["Si", "Si", "Si"],
                &transmissions,
                &["C", "Si"],
                0.3,
                mode,
            );
            let free = super::super::get_best_config(&transmissions, 0.3, mode);
            assert_eq!(restricted, free);
        }
    }

    #[test]
    fn empty_input_is_fully_open() {
        let conf = get_best_config_with_material_priority::<&str, &str>(&[], &[], &["C"], 0.5, ConfigMode::Floor);
        assert!(conf.filter_states.is_empty());
        assert_eq!(conf.transmission, 1.0);
    }

    proptest! {
        #[test]
        fn priority_rule_holds(
            filters in prop::collection::vec((any::<bool>(), 0.01f64..0.99), 1..=12),
            t_des in 0.0f64..=1.0,
            ceiling in any::<bool>(),
        ) {
            let materials: Vec<&str> = filters.iter().map(|(c, _)| if *c { "C" } else { "Si" }).collect();
            let transmissions: Vec<f64> = filters.iter().map(|(_, t)| *t).collect();
            let mode = if ceiling { ConfigMode::Ceiling } else { ConfigMode::Floor };

            let conf = get_best_config_with_material_priority(&materials, &transmissions, &["C", "Si"], t_des, mode);

            let inserted_si = materials.iter().zip(&conf.filter_states).any(|(m, s)| *s && *m == "Si");
            if inserted_si {
                prop_assert!(materials.iter().zip(&conf.filter_states).all(|(m, s)| *m != "C" || *s));
            }
        }
    }
}
