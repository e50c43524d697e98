//! Recalculation loop of one attenuator.
//!
//! Inputs and blade feedback arrive as [`AttenuatorEvent`]s. Events that
//! change something relevant start a calculation cycle; a cycle that is
//! triggered while another one runs is dropped, not queued.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    blade_state::BladeState,
    catalog::{Blade, BladeId, FilterCatalog, FilterId, TotalTransmission},
    descriptor::DeviceFamily,
    error::{Error, Result},
    publisher::{
        AttenuatorStatus, FeedbackStatus, FilterReport, Publisher, StatusUpdate,
        TargetConfiguration,
    },
    search::{ConfigMode, get_best_config, get_best_config_with_material_priority, get_ladder_config},
    sequencer::{MotionProgress, MotionQueue, MotionSequencer, StepOutcome},
    transmission::TransmissionModel,
};

const UM_PER_M: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// Measured photon energy.
    #[default]
    Actual,
    /// Operator override.
    Custom,
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actual => write!(f, "Actual"),
            Self::Custom => write!(f, "Custom"),
        }
    }
}

impl FromStr for EnergySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "actual" => Ok(Self::Actual),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown energy source '{other}'")),
        }
    }
}

/// Operator and beamline inputs of a calculation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CalculationInputs {
    #[serde(default)]
    pub energy_source: EnergySource,
    /// eV
    pub energy_actual: f64,
    /// eV
    pub energy_custom: f64,
    pub desired_transmission: f64,
    #[serde(default)]
    pub mode: ConfigMode,
}

impl Default for CalculationInputs {
    fn default() -> Self {
        Self {
            energy_source: EnergySource::Actual,
            energy_actual: 8000.0,
            energy_custom: 8000.0,
            desired_transmission: 1.0,
            mode: ConfigMode::Floor,
        }
    }
}

impl CalculationInputs {
    /// Photon energy of the selected source.
    pub fn energy(&self) -> f64 {
        match self.energy_source {
            EnergySource::Actual => self.energy_actual,
            EnergySource::Custom => self.energy_custom,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_energy(self.energy_actual)?;
        check_energy(self.energy_custom)?;
        check_transmission(self.desired_transmission)
    }
}

fn check_energy(energy: f64) -> Result<()> {
    if energy.is_finite() && energy > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("photon energy {energy} eV")))
    }
}

fn check_transmission(transmission: f64) -> Result<()> {
    if (0.0..=1.0).contains(&transmission) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("desired transmission {transmission}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterChange {
    Material(String),
    ThicknessUm(f64),
    Active(bool),
    Stuck(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttenuatorEvent {
    EnergyChanged(f64),
    CustomEnergyChanged(f64),
    EnergySourceChanged(EnergySource),
    DesiredTransmissionChanged(f64),
    ModeChanged(ConfigMode),
    BladeFeedback { blade: BladeId, state: BladeState },
    FilterChanged { filter: FilterId, change: FilterChange },
    /// Recalculate without any input change.
    Recalculate,
}

/// Best target for the working filters in `catalog`.
///
/// A blade that is not selected is retracted, except when it has no working
/// filter because one of its filters is stuck: such a blade is left alone.
pub fn find_target(catalog: &FilterCatalog, desired: f64, mode: ConfigMode) -> TargetConfiguration {
    let blades = catalog.blades();
    let mut states: Vec<Option<BladeState>> = blades.iter().map(idle_target).collect();

    let transmission = match catalog.family() {
        family @ (DeviceFamily::Bitmask | DeviceFamily::MaterialPriority { .. }) => {
            let basis: Vec<(BladeId, &str, f64)> = blades
                .iter()
                .filter_map(|blade| {
                    blade
                        .working_filters()
                        .next()
                        .map(|(filter, pair)| (blade.id, filter.material.as_str(), pair.fundamental))
                })
                .collect();
            let transmissions: Vec<f64> = basis.iter().map(|(_, _, t)| *t).collect();

            let result = match family {
                DeviceFamily::MaterialPriority { material_order } => {
                    let materials: Vec<&str> = basis.iter().map(|(_, m, _)| *m).collect();
                    get_best_config_with_material_priority(
                        &materials,
                        &transmissions,
                        material_order,
                        desired,
                        mode,
                    )
                }
                _ => get_best_config(&transmissions, desired, mode),
            };

            for ((blade, _, _), inserted) in basis.iter().zip(&result.filter_states) {
                states[blade.0] = Some(if *inserted {
                    BladeState::In(0)
                } else {
                    BladeState::Out
                });
            }
            result.transmission
        }
        DeviceFamily::Ladder => {
            let options: Vec<Vec<(usize, f64)>> = blades
                .iter()
                .map(|blade| {
                    blade
                        .working_filters()
                        .map(|(filter, pair)| (filter.id.slot, pair.fundamental))
                        .collect()
                })
                .collect();
            let transmissions: Vec<Vec<f64>> = options
                .iter()
                .map(|blade| blade.iter().map(|(_, t)| *t).collect())
                .collect();

            let result = get_ladder_config(&transmissions, desired, mode);
            for ((state, options), choice) in states.iter_mut().zip(&options).zip(&result.filter_states) {
                if let Some(idx) = choice {
                    *state = Some(BladeState::In(options[*idx].0));
                }
            }
            result.transmission
        }
    };

    let transmission_3omega = TotalTransmission::product(
        blades
            .iter()
            .zip(&states)
            .filter_map(|(blade, state)| {
                state
                    .and_then(|s| s.slot())
                    .and_then(|slot| blade.filters.get(slot))
            })
            .filter_map(|filter| filter.status().working()),
    )
    .third_harmonic;

    TargetConfiguration {
        bitmask: catalog.insertion_bitmask(&states),
        blades: states,
        transmission,
        transmission_3omega,
        desired_transmission: desired,
        error: transmission - desired,
        mode,
    }
}

fn idle_target(blade: &Blade) -> Option<BladeState> {
    if blade.working_filters().next().is_none() && blade.has_stuck_filter() {
        None
    } else {
        Some(BladeState::Out)
    }
}

/// Clears the busy flag when the cycle ends, whichever way it ends.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a AtomicBool) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

struct CoordinatorState {
    catalog: FilterCatalog,
    inputs: CalculationInputs,
    target: Option<TargetConfiguration>,
}

pub struct AttenuatorCoordinator {
    name: String,
    model: TransmissionModel,
    state: Mutex<CoordinatorState>,
    busy: AtomicBool,
    publisher: Arc<dyn Publisher>,
    sequencer: MotionSequencer,
    motion_done: Notify,
}

impl AttenuatorCoordinator {
    pub fn new(
        catalog: FilterCatalog,
        model: TransmissionModel,
        inputs: CalculationInputs,
        publisher: Arc<dyn Publisher>,
        queue: MotionQueue,
    ) -> Result<Self> {
        inputs.validate()?;
        Ok(Self {
            name: catalog.name().to_string(),
            model,
            state: Mutex::new(CoordinatorState {
                catalog,
                inputs,
                target: None,
            }),
            busy: AtomicBool::new(false),
            publisher,
            sequencer: MotionSequencer::new(queue),
            motion_done: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a calculation cycle is in progress.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn inputs(&self) -> CalculationInputs {
        self.state.lock().await.inputs.clone()
    }

    pub async fn target(&self) -> Option<TargetConfiguration> {
        self.state.lock().await.target.clone()
    }

    pub async fn catalog(&self) -> FilterCatalog {
        self.state.lock().await.catalog.clone()
    }

    /// Runs one calculation cycle and publishes its result.
    ///
    /// Returns `None` without doing anything when another cycle is running.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn run_calculation(&self) -> Result<Option<TargetConfiguration>> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            warn!("Calculation already in progress, dropping trigger");
            return Ok(None);
        };

        let status = {
            let mut state = self.state.lock().await;
            let energy = state.inputs.energy();

            let updates = state
                .catalog
                .filters()
                .map(|filter| {
                    let pair = self
                        .model
                        .transmission_pair(&filter.material, filter.thickness, energy)
                        .map_err(|err| {
                            warn!(filter = %filter.id, material = %filter.material, %err, "Filter excluded");
                            err.to_string()
                        });
                    (filter.id, pair)
                })
                .collect();
            state.catalog.apply_transmissions(updates)?;

            let actual = state.catalog.actual_transmission();
            let calculated = state.catalog.calculated_transmission();
            let target = find_target(
                &state.catalog,
                state.inputs.desired_transmission,
                state.inputs.mode,
            );
            state.target = Some(target.clone());

            info!(
                energy,
                source = %state.inputs.energy_source,
                desired = target.desired_transmission,
                mode = %target.mode,
                actual = actual.fundamental,
                target = target.transmission,
                error = target.error,
                "Calculated configuration"
            );

            AttenuatorStatus {
                name: self.name.clone(),
                energy,
                energy_source: state.inputs.energy_source,
                filters: state
                    .catalog
                    .filters()
                    .map(|filter| FilterReport {
                        id: filter.id,
                        material: filter.material.clone(),
                        thickness_um: filter.thickness * UM_PER_M,
                        status: filter.status(),
                    })
                    .collect(),
                actual,
                calculated,
                target,
            }
        };

        let target = status.target.clone();
        self.publisher
            .publish(StatusUpdate::Calculation(Box::new(status)))
            .await?;
        Ok(Some(target))
    }

    /// Applies one event. Returns whether it calls for a new calculation.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn handle_event(&self, event: AttenuatorEvent) -> Result<bool> {
        let mut feedback = None;

        let trigger = {
            let mut guard = self.state.lock().await;
            let CoordinatorState { catalog, inputs, .. } = &mut *guard;
            match event {
                AttenuatorEvent::EnergyChanged(energy) => {
                    check_energy(energy)?;
                    let changed = inputs.energy_actual != energy;
                    inputs.energy_actual = energy;
                    changed && inputs.energy_source == EnergySource::Actual
                }
                AttenuatorEvent::CustomEnergyChanged(energy) => {
                    check_energy(energy)?;
                    let changed = inputs.energy_custom != energy;
                    inputs.energy_custom = energy;
                    changed && inputs.energy_source == EnergySource::Custom
                }
                AttenuatorEvent::EnergySourceChanged(source) => {
                    let changed = inputs.energy_source != source;
                    inputs.energy_source = source;
                    changed
                }
                AttenuatorEvent::DesiredTransmissionChanged(transmission) => {
                    check_transmission(transmission)?;
                    let changed = inputs.desired_transmission != transmission;
                    inputs.desired_transmission = transmission;
                    changed
                }
                AttenuatorEvent::ModeChanged(mode) => {
                    let changed = inputs.mode != mode;
                    inputs.mode = mode;
                    changed
                }
                AttenuatorEvent::BladeFeedback { blade, state } => {
                    let changed = catalog.set_blade_state(blade, state)?;
                    if changed {
                        debug!(%blade, %state, "Blade feedback");
                        feedback = Some(FeedbackStatus {
                            active_config: catalog.active_config(),
                            moving: catalog.moving(),
                            active_bitmask: catalog.active_bitmask(),
                            moving_bitmask: catalog.moving_bitmask(),
                            actual: catalog.actual_transmission(),
                        });
                    }
                    changed && !state.is_moving()
                }
                AttenuatorEvent::FilterChanged { filter, change } => match change {
                    FilterChange::Material(material) => catalog.set_material(filter, &material)?,
                    FilterChange::ThicknessUm(um) => catalog.set_thickness_um(filter, um)?,
                    FilterChange::Active(active) => catalog.set_active(filter, active)?,
                    FilterChange::Stuck(stuck) => catalog.set_stuck(filter, stuck)?,
                },
                AttenuatorEvent::Recalculate => true,
            }
        };

        if let Some(feedback) = feedback {
            self.motion_done.notify_one();
            self.publisher.publish(StatusUpdate::Feedback(feedback)).await?;
        }
        Ok(trigger)
    }

    /// Starts a calculation in the background unless one is running.
    pub fn trigger(self: &Arc<Self>) {
        if self.is_busy() {
            warn!(name = %self.name, "Calculation already in progress, dropping trigger");
            return;
        }
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.run_calculation().await {
                error!(name = %coordinator.name, %err, "Calculation failed");
            }
        });
    }

    /// Consumes events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AttenuatorEvent>) {
        info!(name = %self.name, "Coordinator started");
        while let Some(event) = events.recv().await {
            match self.handle_event(event).await {
                Ok(true) => self.trigger(),
                Ok(false) => {}
                Err(err) => warn!(name = %self.name, %err, "Rejected event"),
            }
        }
        info!(name = %self.name, "Event channel closed, coordinator stopped");
    }

    /// Issues the next batch of motion commands towards the current target.
    pub async fn move_blade_step(&self, progress: &mut MotionProgress) -> Result<StepOutcome> {
        let (current, target) = {
            let state = self.state.lock().await;
            let target = state
                .target
                .as_ref()
                .map(|t| t.blades.clone())
                .unwrap_or_default();
            (state.catalog.active_config(), target)
        };
        self.sequencer.step(&current, &target, progress).await
    }

    /// Waits for the next blade feedback change. Returns `false` on timeout.
    pub async fn wait_for_motion(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.motion_done.notified())
            .await
            .is_ok()
    }
}
