use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on independently insertable filters; the bitmask search
/// enumerates `2^n` configurations.
pub const MAX_BITMASK_FILTERS: usize = 20;

/// Upper bound on the size of the ladder product table.
pub const MAX_LADDER_CONFIGURATIONS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Every blade carries one filter which is moved in or out on its own.
    Bitmask,
    /// Like `Bitmask`, but a material may only be used once every working
    /// filter of each material before it in `material_order` is inserted.
    MaterialPriority { material_order: Vec<String> },
    /// Every blade carries several filters and inserts at most one of them.
    Ladder,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterDescriptor {
    pub material: String,
    pub thickness_um: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub stuck: bool,
}

impl FilterDescriptor {
    pub fn new(material: impl Into<String>, thickness_um: f64) -> Self {
        Self {
            material: material.into(),
            thickness_um,
            active: true,
            stuck: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BladeDescriptor {
    pub filters: Vec<FilterDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub family: DeviceFamily,
    pub blades: Vec<BladeDescriptor>,
}

impl DeviceDescriptor {
    /// One single-filter blade per entry.
    pub fn in_out(name: impl Into<String>, family: DeviceFamily, filters: Vec<FilterDescriptor>) -> Self {
        Self {
            name: name.into(),
            family,
            blades: filters
                .into_iter()
                .map(|filter| BladeDescriptor {
                    filters: vec![filter],
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidDescriptor(message));

        if self.blades.is_empty() {
            return invalid(format!("{} has no blades", self.name));
        }

        for (blade_idx, blade) in self.blades.iter().enumerate() {
            if blade.filters.is_empty() {
                return invalid(format!("blade {blade_idx} has no filters"));
            }
            for (slot, filter) in blade.filters.iter().enumerate() {
                if filter.material.trim().is_empty() {
                    return invalid(format!("blade {blade_idx} slot {slot} has no material"));
                }
                if !(filter.thickness_um.is_finite() && filter.thickness_um > 0.0) {
                    return invalid(format!(
                        "blade {blade_idx} slot {slot} has thickness {} um",
                        filter.thickness_um
                    ));
                }
            }
        }

        match &self.family {
            DeviceFamily::Bitmask | DeviceFamily::MaterialPriority { .. } => {
                if let Some(idx) = self.blades.iter().position(|b| b.filters.len() != 1) {
                    return invalid(format!(
                        "blade {idx} of an in/out device must carry exactly one filter"
                    ));
                }
                if self.blades.len() > MAX_BITMASK_FILTERS {
                    return invalid(format!(
                        "{} filters exceed the limit of {MAX_BITMASK_FILTERS}",
                        self.blades.len()
                    ));
                }
            }
            DeviceFamily::Ladder => {
                let configurations = self
                    .blades
                    .iter()
                    .try_fold(1usize, |acc, b| acc.checked_mul(b.filters.len() + 1));
                match configurations {
                    Some(n) if n <= MAX_LADDER_CONFIGURATIONS => {}
                    _ => {
                        return invalid(format!(
                            "ladder has more than {MAX_LADDER_CONFIGURATIONS} configurations"
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
