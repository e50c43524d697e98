use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    coordinator::AttenuatorCoordinator,
    error::Result,
    sequencer::{MotionProgress, SequencerPhase},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MotionDriverConfig {
    /// How long one step may take before it counts as a retry.
    #[serde(with = "millis")]
    pub step_timeout: Duration,
    /// Consecutive timeouts tolerated before giving up.
    pub max_retries: u32,
}

impl Default for MotionDriverConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// Every blade reports its target state.
    Done { steps: usize },
    TimedOut { steps: usize },
}

/// Moves the blades of one attenuator to its current target.
pub struct MotionDriver {
    coordinator: Arc<AttenuatorCoordinator>,
    config: MotionDriverConfig,
}

impl MotionDriver {
    pub fn new(coordinator: Arc<AttenuatorCoordinator>, config: MotionDriverConfig) -> Self {
        Self { coordinator, config }
    }

    /// Steps the sequencer until the device is at rest at the target, waiting
    /// for blade feedback between steps. A step without feedback inside
    /// `step_timeout` is retried with fresh progress, so its commands are
    /// sent again.
    #[instrument(skip(self), fields(name = %self.coordinator.name()))]
    pub async fn apply(&self) -> Result<MotionOutcome> {
        let mut progress = MotionProgress::new();
        let mut steps = 0;
        let mut retries = 0;

        loop {
            let outcome = self.coordinator.move_blade_step(&mut progress).await?;
            if outcome.phase == SequencerPhase::Idle {
                info!(steps, "Attenuator at target");
                return Ok(MotionOutcome::Done { steps });
            }
            steps += 1;

            if self.coordinator.wait_for_motion(self.config.step_timeout).await {
                retries = 0;
                continue;
            }

            retries += 1;
            if retries >= self.config.max_retries {
                warn!(steps, retries, "Blades did not reach the target");
                return Ok(MotionOutcome::TimedOut { steps });
            }
            warn!(retries, "No blade feedback, retrying step");
            progress.clear();
        }
    }
}
