use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    blade_state::BladeState,
    catalog::{FilterId, FilterStatus, TotalTransmission},
    coordinator::EnergySource,
    error::Result,
    search::ConfigMode,
};

/// Best configuration found by the last calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetConfiguration {
    /// Per blade; `None` leaves the blade where it is.
    pub blades: Vec<Option<BladeState>>,
    /// One flag per filter, blade by blade, set for filters put in the beam.
    pub bitmask: Vec<bool>,
    pub transmission: f64,
    pub transmission_3omega: f64,
    pub desired_transmission: f64,
    /// `transmission - desired_transmission`.
    pub error: f64,
    pub mode: ConfigMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub id: FilterId,
    pub material: String,
    pub thickness_um: f64,
    pub status: FilterStatus,
}

/// Everything one calculation cycle produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttenuatorStatus {
    pub name: String,
    pub energy: f64,
    pub energy_source: EnergySource,
    pub filters: Vec<FilterReport>,
    /// Through the filters currently in the beam.
    pub actual: TotalTransmission,
    /// With every working filter in the beam.
    pub calculated: TotalTransmission,
    pub target: TargetConfiguration,
}

/// Blade feedback between calculations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStatus {
    pub active_config: Vec<BladeState>,
    pub moving: Vec<bool>,
    /// Per filter, like [`TargetConfiguration::bitmask`].
    pub active_bitmask: Vec<bool>,
    pub moving_bitmask: Vec<bool>,
    pub actual: TotalTransmission,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Calculation(Box<AttenuatorStatus>),
    Feedback(FeedbackStatus),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Resolves once the update has been accepted.
    async fn publish(&self, update: StatusUpdate) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedState {
    pub calculation: Option<AttenuatorStatus>,
    pub feedback: Option<FeedbackStatus>,
}

/// Keeps the latest values in a `watch` channel.
#[derive(Debug)]
pub struct WatchPublisher {
    sender: watch::Sender<PublishedState>,
}

impl WatchPublisher {
    pub fn channel() -> (Self, watch::Receiver<PublishedState>) {
        let (sender, receiver) = watch::channel(PublishedState::default());
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Publisher for WatchPublisher {
    async fn publish(&self, update: StatusUpdate) -> Result<()> {
        self.sender.send_modify(|state| match update {
            StatusUpdate::Calculation(status) => state.calculation = Some(*status),
            StatusUpdate::Feedback(feedback) => state.feedback = Some(feedback),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_keeps_latest_feedback() {
        let (publisher, mut receiver) = WatchPublisher::channel();
        let feedback = FeedbackStatus {
            active_config: vec![BladeState::Out],
            moving: vec![false],
            active_bitmask: vec![false, false],
            moving_bitmask: vec![false, false],
            actual: TotalTransmission::OPEN,
        };

        publisher
            .publish(StatusUpdate::Feedback(feedback.clone()))
            .await
            .unwrap();

        assert!(receiver.has_changed().unwrap());
        let state = receiver.borrow_and_update().clone();
        assert_eq!(state.feedback, Some(feedback));
        assert!(state.calculation.is_none());
    }
}
