//! Volume snapshot records.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotPhase {
    New,
    InProgress,
    Completed,
    Failed,
}

impl SnapshotPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SnapshotPhase::Completed | SnapshotPhase::Failed)
    }

    fn can_transition_to(self, next: SnapshotPhase) -> bool {
        matches!(
            (self, next),
            (SnapshotPhase::New, SnapshotPhase::InProgress)
                | (SnapshotPhase::InProgress, SnapshotPhase::Completed)
                | (SnapshotPhase::InProgress, SnapshotPhase::Failed)
        )
    }
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotPhase::New => "New",
            SnapshotPhase::InProgress => "InProgress",
            SnapshotPhase::Completed => "Completed",
            SnapshotPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshotSpec {
    pub backup_name: String,
    pub location: String,
    pub persistent_volume_name: String,
    pub provider_volume_id: String,
    pub volume_az: String,
    pub volume_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_iops: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshotStatus {
    pub phase: SnapshotPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub spec: VolumeSnapshotSpec,
    pub status: VolumeSnapshotStatus,
}

/// Rejected phase change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid snapshot phase transition {from} -> {to}")]
pub struct PhaseTransitionError {
    pub from: SnapshotPhase,
    pub to: SnapshotPhase,
}

impl VolumeSnapshot {
    pub fn new(spec: VolumeSnapshotSpec) -> Self {
        Self {
            spec,
            status: VolumeSnapshotStatus {
                phase: SnapshotPhase::New,
                provider_snapshot_id: None,
            },
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.status.phase
    }

    fn transition(&mut self, next: SnapshotPhase) -> Result<(), PhaseTransitionError> {
        if !self.status.phase.can_transition_to(next) {
            return Err(PhaseTransitionError {
                from: self.status.phase,
                to: next,
            });
        }
        self.status.phase = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(SnapshotPhase::InProgress)
    }

    pub fn complete(&mut self, snapshot_id: String) -> Result<(), PhaseTransitionError> {
        self.transition(SnapshotPhase::Completed)?;
        self.status.provider_snapshot_id = Some(snapshot_id);
        Ok(())
    }

    /// Terminal failure; any snapshot ID is cleared.
    pub fn fail(&mut self) -> Result<(), PhaseTransitionError> {
        self.transition(SnapshotPhase::Failed)?;
        self.status.provider_snapshot_id = None;
        Ok(())
    }
}
