pub mod blade_state;
pub mod catalog;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod motion;
pub mod publisher;
pub mod search;
pub mod sequencer;
pub mod transmission;

pub use blade_state::BladeState;
pub use catalog::{BladeId, FilterCatalog, FilterId, FilterStatus, TotalTransmission};
pub use coordinator::{
    AttenuatorCoordinator, AttenuatorEvent, CalculationInputs, EnergySource, FilterChange,
};
pub use descriptor::{BladeDescriptor, DeviceDescriptor, DeviceFamily, FilterDescriptor};
pub use error::{Error, Result};
pub use motion::{MotionDriver, MotionDriverConfig, MotionOutcome};
pub use publisher::{
    AttenuatorStatus, PublishedState, Publisher, StatusUpdate, TargetConfiguration,
    WatchPublisher,
};
pub use search::{ConfigMode, SearchResult};
pub use sequencer::{MotionCommand, MotionQueue, MotionReceiver, MotionSequencer};
pub use transmission::{
    AbsorptionSource, AbsorptionTable, InMemoryTables, TableDirectory, TransmissionModel,
    TransmissionPair,
};
