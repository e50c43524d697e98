//! Filter inventory of one attenuator.
//!
//! Blades live in an arena indexed by [`BladeId`]; filters are addressed by
//! [`FilterId`] (blade plus slot on that blade). Whether a filter takes part
//! in a configuration search is an explicit [`FilterStatus`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    blade_state::BladeState,
    descriptor::{DeviceDescriptor, DeviceFamily},
    error::{Error, Result},
    transmission::TransmissionPair,
};

const M_PER_UM: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BladeId(pub usize);

impl fmt::Display for BladeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterId {
    pub blade: BladeId,
    pub slot: usize,
}

impl FilterId {
    pub fn new(blade: usize, slot: usize) -> Self {
        Self {
            blade: BladeId(blade),
            slot,
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blade {} filter {:02}", self.blade, self.slot + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exclusion {
    Inactive,
    Stuck,
    /// No transmission at the current energy (unknown material, energy out
    /// of range, or not yet computed).
    NoTransmission(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterStatus {
    Working(TransmissionPair),
    Excluded(Exclusion),
}

impl FilterStatus {
    pub fn working(&self) -> Option<TransmissionPair> {
        match self {
            Self::Working(pair) => Some(*pair),
            Self::Excluded(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub id: FilterId,
    pub material: String,
    /// Metres.
    pub thickness: f64,
    pub active: bool,
    pub stuck: bool,
    transmission: std::result::Result<TransmissionPair, String>,
}

impl Filter {
    pub fn transmission(&self) -> std::result::Result<TransmissionPair, &str> {
        self.transmission.as_ref().copied().map_err(String::as_str)
    }

    pub fn status(&self) -> FilterStatus {
        if !self.active {
            return FilterStatus::Excluded(Exclusion::Inactive);
        }
        if self.stuck {
            return FilterStatus::Excluded(Exclusion::Stuck);
        }
        match &self.transmission {
            Ok(pair) => FilterStatus::Working(*pair),
            Err(reason) => FilterStatus::Excluded(Exclusion::NoTransmission(reason.clone())),
        }
    }

    pub fn is_working(&self) -> bool {
        self.status().working().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Blade {
    pub id: BladeId,
    pub filters: Vec<Filter>,
    pub state: BladeState,
}

impl Blade {
    /// Filter currently in the beam, if the blade reports one.
    pub fn inserted_filter(&self) -> Option<&Filter> {
        self.state.slot().and_then(|slot| self.filters.get(slot))
    }

    pub fn working_filters(&self) -> impl Iterator<Item = (&Filter, TransmissionPair)> {
        self.filters
            .iter()
            .filter_map(|f| f.status().working().map(|pair| (f, pair)))
    }

    pub fn has_stuck_filter(&self) -> bool {
        self.filters.iter().any(|f| f.stuck)
    }
}

/// Product of transmissions over a set of filters. Filters without a third
/// harmonic value are left out of `third_harmonic`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalTransmission {
    pub fundamental: f64,
    pub third_harmonic: f64,
}

impl TotalTransmission {
    pub const OPEN: Self = Self {
        fundamental: 1.0,
        third_harmonic: 1.0,
    };

    pub fn product<I: IntoIterator<Item = TransmissionPair>>(pairs: I) -> Self {
        pairs.into_iter().fold(Self::OPEN, |acc, pair| Self {
            fundamental: acc.fundamental * pair.fundamental,
            third_harmonic: acc.third_harmonic * pair.third_harmonic.unwrap_or(1.0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FilterCatalog {
    name: String,
    family: DeviceFamily,
    blades: Vec<Blade>,
}

impl FilterCatalog {
    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Result<Self> {
        descriptor.validate()?;

        let blades = descriptor
            .blades
            .iter()
            .enumerate()
            .map(|(blade_idx, blade)| Blade {
                id: BladeId(blade_idx),
                filters: blade
                    .filters
                    .iter()
                    .enumerate()
                    .map(|(slot, filter)| Filter {
                        id: FilterId::new(blade_idx, slot),
                        material: filter.material.clone(),
                        thickness: filter.thickness_um * M_PER_UM,
                        active: filter.active,
                        stuck: filter.stuck,
                        transmission: Err("not yet calculated".to_string()),
                    })
                    .collect(),
                state: BladeState::Unknown,
            })
            .collect();

        Ok(Self {
            name: descriptor.name.clone(),
            family: descriptor.family.clone(),
            blades,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &DeviceFamily {
        &self.family
    }

    pub fn blades(&self) -> &[Blade] {
        &self.blades
    }

    pub fn blade(&self, id: BladeId) -> Result<&Blade> {
        self.blades.get(id.0).ok_or(Error::UnknownBlade(id.0))
    }

    fn blade_mut(&mut self, id: BladeId) -> Result<&mut Blade> {
        self.blades.get_mut(id.0).ok_or(Error::UnknownBlade(id.0))
    }

    pub fn filter(&self, id: FilterId) -> Result<&Filter> {
        self.blade(id.blade)?
            .filters
            .get(id.slot)
            .ok_or(Error::UnknownFilter(id))
    }

    fn filter_mut(&mut self, id: FilterId) -> Result<&mut Filter> {
        self.blade_mut(id.blade)?
            .filters
            .get_mut(id.slot)
            .ok_or(Error::UnknownFilter(id))
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.blades.iter().flat_map(|b| b.filters.iter())
    }

    /// Filters that are active, not stuck and have a transmission value.
    pub fn working_filters(&self) -> impl Iterator<Item = (&Filter, TransmissionPair)> {
        self.blades.iter().flat_map(Blade::working_filters)
    }

    /// Stores freshly calculated transmissions. Every id must exist; nothing
    /// is written unless all of them do.
    pub fn apply_transmissions(
        &mut self,
        updates: Vec<(FilterId, std::result::Result<TransmissionPair, String>)>,
    ) -> Result<()> {
        for (id, _) in &updates {
            self.filter(*id)?;
        }
        for (id, transmission) in updates {
            self.filter_mut(id)?.transmission = transmission;
        }
        Ok(())
    }

    /// Returns whether anything changed.
    pub fn set_blade_state(&mut self, id: BladeId, state: BladeState) -> Result<bool> {
        let blade = self.blade_mut(id)?;
        if blade.state == state {
            return Ok(false);
        }
        blade.state = state;
        Ok(true)
    }

    pub fn set_active(&mut self, id: FilterId, active: bool) -> Result<bool> {
        let filter = self.filter_mut(id)?;
        let changed = filter.active != active;
        filter.active = active;
        Ok(changed)
    }

    pub fn set_stuck(&mut self, id: FilterId, stuck: bool) -> Result<bool> {
        let filter = self.filter_mut(id)?;
        let changed = filter.stuck != stuck;
        filter.stuck = stuck;
        Ok(changed)
    }

    pub fn set_material(&mut self, id: FilterId, material: &str) -> Result<bool> {
        if material.trim().is_empty() {
            return Err(Error::InvalidDescriptor(format!("{id} material is empty")));
        }
        let filter = self.filter_mut(id)?;
        if filter.material == material {
            return Ok(false);
        }
        filter.material = material.to_string();
        filter.transmission = Err("material changed".to_string());
        Ok(true)
    }

    pub fn set_thickness_um(&mut self, id: FilterId, thickness_um: f64) -> Result<bool> {
        if !(thickness_um.is_finite() && thickness_um > 0.0) {
            return Err(Error::InvalidDescriptor(format!(
                "{id} thickness {thickness_um} um"
            )));
        }
        let filter = self.filter_mut(id)?;
        let thickness = thickness_um * M_PER_UM;
        if filter.thickness == thickness {
            return Ok(false);
        }
        filter.thickness = thickness;
        filter.transmission = Err("thickness changed".to_string());
        Ok(true)
    }

    pub fn active_config(&self) -> Vec<BladeState> {
        self.blades.iter().map(|b| b.state).collect()
    }

    pub fn moving(&self) -> Vec<bool> {
        self.blades.iter().map(|b| b.state.is_moving()).collect()
    }

    /// One flag per filter, blade by blade in slot order, set where `states`
    /// puts that filter in the beam.
    pub fn insertion_bitmask(&self, states: &[Option<BladeState>]) -> Vec<bool> {
        self.blades
            .iter()
            .zip(states)
            .flat_map(|(blade, state)| {
                let slot = state.and_then(|s| s.slot());
                (0..blade.filters.len()).map(move |i| slot == Some(i))
            })
            .collect()
    }

    /// Filters the blades report in the beam.
    pub fn active_bitmask(&self) -> Vec<bool> {
        let states: Vec<Option<BladeState>> = self.blades.iter().map(|b| Some(b.state)).collect();
        self.insertion_bitmask(&states)
    }

    /// Filters whose blade is moving.
    pub fn moving_bitmask(&self) -> Vec<bool> {
        self.blades
            .iter()
            .flat_map(|b| std::iter::repeat_n(b.state.is_moving(), b.filters.len()))
            .collect()
    }

    /// Transmission through the filters currently in the beam. Excluded
    /// filters are treated as out, so a filter stuck in makes this an
    /// overestimate.
    pub fn actual_transmission(&self) -> TotalTransmission {
        TotalTransmission::product(
            self.blades
                .iter()
                .filter_map(Blade::inserted_filter)
                .filter_map(|f| f.status().working()),
        )
    }

    /// Transmission with every working filter in the beam.
    pub fn calculated_transmission(&self) -> TotalTransmission {
        TotalTransmission::product(self.working_filters().map(|(_, pair)| pair))
    }
}
