//! Turns a target configuration into blade motion, one safe step at a time.
//!
//! Blades that have to go in are always commanded before any blade is
//! taken out, so the beam is never less attenuated mid-move than at either
//! end of the move.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::{
    blade_state::BladeState,
    catalog::{BladeId, FilterId},
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub blade: BladeId,
    pub target: BladeState,
}

impl MotionCommand {
    /// The filter being inserted, if any.
    pub fn filter(&self) -> Option<FilterId> {
        self.target.slot().map(|slot| FilterId {
            blade: self.blade,
            slot,
        })
    }
}

/// Sending half of the outbound motion queue. One producer per device.
#[derive(Debug, Clone)]
pub struct MotionQueue {
    sender: mpsc::Sender<MotionCommand>,
}

pub type MotionReceiver = mpsc::Receiver<MotionCommand>;

impl MotionQueue {
    pub fn channel(capacity: usize) -> (Self, MotionReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Waits for a free slot in the queue.
    pub async fn submit(&self, command: MotionCommand) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| Error::MotionQueueClosed)
    }
}

/// Commands already issued during the current move, owned by whoever drives
/// the sequencer. Only used to avoid sending the same command twice.
#[derive(Debug, Default, Clone)]
pub struct MotionProgress {
    issued: HashMap<BladeId, BladeState>,
}

impl MotionProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.issued.clear();
    }

    pub fn issued(&self, blade: BladeId) -> Option<BladeState> {
        self.issued.get(&blade).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    /// Every blade matches the target.
    Idle,
    Sequencing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionPlan {
    pub to_insert: Vec<MotionCommand>,
    pub to_retract: Vec<MotionCommand>,
}

impl MotionPlan {
    /// Blades whose reported state differs from the target. Blades with no
    /// target are left alone.
    pub fn new(current: &[BladeState], target: &[Option<BladeState>]) -> Self {
        let mut plan = Self::default();
        for (idx, (active, wanted)) in current.iter().zip(target).enumerate() {
            let Some(wanted) = wanted else {
                continue;
            };
            if active == wanted {
                continue;
            }
            let command = MotionCommand {
                blade: BladeId(idx),
                target: *wanted,
            };
            if wanted.is_inserted() {
                plan.to_insert.push(command);
            } else {
                plan.to_retract.push(command);
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_retract.is_empty()
    }

    /// Insertions while any are pending, retractions after that.
    pub fn next_batch(&self) -> &[MotionCommand] {
        if self.to_insert.is_empty() {
            &self.to_retract
        } else {
            &self.to_insert
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub phase: SequencerPhase,
    pub issued: Vec<MotionCommand>,
}

#[derive(Debug, Clone)]
pub struct MotionSequencer {
    queue: MotionQueue,
}

impl MotionSequencer {
    pub fn new(queue: MotionQueue) -> Self {
        Self { queue }
    }

    /// Issues the next batch of commands needed to move `current` towards
    /// `target`. Call again after motion completes (or times out) until the
    /// phase is [`SequencerPhase::Idle`].
    #[instrument(skip_all)]
    pub async fn step(
        &self,
        current: &[BladeState],
        target: &[Option<BladeState>],
        progress: &mut MotionProgress,
    ) -> Result<StepOutcome> {
        let plan = MotionPlan::new(current, target);
        if plan.is_empty() {
            return Ok(StepOutcome {
                phase: SequencerPhase::Idle,
                issued: Vec::new(),
            });
        }

        let mut issued = Vec::new();
        for command in plan.next_batch() {
            if progress.issued(command.blade) == Some(command.target) {
                continue;
            }
            debug!(blade = %command.blade, target = %command.target, "Moving blade");
            self.queue.submit(*command).await?;
            progress.issued.insert(command.blade, command.target);
            issued.push(*command);
        }

        Ok(StepOutcome {
            phase: SequencerPhase::Sequencing,
            issued,
        })
    }
}
