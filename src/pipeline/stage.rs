//! Pipeline stages and the stage board that tracks them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed sequence of pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Expand the user's idea into strategy text.
    StrategyGeneration,
    /// Turn the strategy into a structured architecture.
    ArchitectureSynthesis,
    /// Implement each architecture function.
    Implementation,
    /// Merge the implementations into one artifact.
    Aggregation,
    /// Local shallow checks of the artifact.
    Validation,
    /// External compilation or sandbox run.
    Verification,
}

impl StageId {
    /// All stages in execution order.
    pub const ALL: [StageId; 6] = [
        StageId::StrategyGeneration,
        StageId::ArchitectureSynthesis,
        StageId::Implementation,
        StageId::Aggregation,
        StageId::Validation,
        StageId::Verification,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            StageId::StrategyGeneration => 0,
            StageId::ArchitectureSynthesis => 1,
            StageId::Implementation => 2,
            StageId::Aggregation => 3,
            StageId::Validation => 4,
            StageId::Verification => 5,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageId::StrategyGeneration => write!(f, "Strategy Generation"),
            StageId::ArchitectureSynthesis => write!(f, "Architecture Synthesis"),
            StageId::Implementation => write!(f, "Implementation"),
            StageId::Aggregation => write!(f, "Aggregation"),
            StageId::Validation => write!(f, "Validation"),
            StageId::Verification => write!(f, "Verification"),
        }
    }
}

/// Lifecycle of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    #[serde(rename = "error")]
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "error"),
        }
    }
}

/// Illegal stage transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition {
        stage: StageId,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("Stage '{stage}' cannot start before '{blocked_by}' has completed")]
    PredecessorIncomplete { stage: StageId, blocked_by: StageId },
}

/// Snapshot of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: StageId,
    pub status: StageStatus,
    /// Short result payload, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error detail, set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineStage {
    fn pending(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock duration once the stage has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.finished_at? - self.started_at?).num_milliseconds())
    }
}

/// Ordered board of all stages of one run.
///
/// Enforces `pending -> running -> (completed | error)` and that a stage
/// only starts once every earlier stage has completed.
#[derive(Debug, Clone, Serialize)]
pub struct StageBoard {
    stages: Vec<PipelineStage>,
}

impl Default for StageBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StageBoard {
    pub fn new() -> Self {
        Self {
            stages: StageId::ALL.iter().copied().map(PipelineStage::pending).collect(),
        }
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn get(&self, id: StageId) -> &PipelineStage {
        &self.stages[id.index()]
    }

    fn get_mut(&mut self, id: StageId) -> &mut PipelineStage {
        &mut self.stages[id.index()]
    }

    /// Marks `id` running.
    pub fn start(&mut self, id: StageId) -> Result<(), StageTransitionError> {
        if let Some(blocker) = self.stages[..id.index()]
            .iter()
            .find(|s| s.status != StageStatus::Completed)
        {
            return Err(StageTransitionError::PredecessorIncomplete {
                stage: id,
                blocked_by: blocker.id,
            });
        }

        let stage = self.get_mut(id);
        if stage.status != StageStatus::Pending {
            return Err(StageTransitionError::InvalidTransition {
                stage: id,
                from: stage.status,
                to: StageStatus::Running,
            });
        }
        stage.status = StageStatus::Running;
        stage.started_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a running stage completed with an optional result payload.
    pub fn complete(
        &mut self,
        id: StageId,
        result: Option<String>,
    ) -> Result<(), StageTransitionError> {
        let stage = self.running_stage(id, StageStatus::Completed)?;
        stage.status = StageStatus::Completed;
        stage.result = result;
        stage.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a running stage failed with the error detail.
    pub fn fail(&mut self, id: StageId, error: impl Into<String>) -> Result<(), StageTransitionError> {
        let stage = self.running_stage(id, StageStatus::Failed)?;
        stage.status = StageStatus::Failed;
        stage.error = Some(error.into());
        stage.finished_at = Some(Utc::now());
        Ok(())
    }

    fn running_stage(
        &mut self,
        id: StageId,
        to: StageStatus,
    ) -> Result<&mut PipelineStage, StageTransitionError> {
        let stage = self.get_mut(id);
        if stage.status != StageStatus::Running {
            return Err(StageTransitionError::InvalidTransition {
                stage: id,
                from: stage.status,
                to,
            });
        }
        Ok(stage)
    }

    /// The stage currently running, if any.
    pub fn current(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
            .map(|s| s.id)
    }

    /// True once every stage has completed.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Completed)
    }

    /// The failed stage, if the run halted.
    pub fn failed_stage(&self) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_board_all_pending() {
        let board = StageBoard::new();
        assert_eq!(board.stages().len(), 6);
        assert!(board
            .stages()
            .iter()
            .all(|s| s.status == StageStatus::Pending));
        assert_eq!(board.current(), None);
        assert!(!board.is_complete());
    }

    #[test]
    fn test_stage_order_matches_index() {
        for (i, id) in StageId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut board = StageBoard::new();
        for id in StageId::ALL {
            board.start(id).unwrap();
            assert_eq!(board.current(), Some(id));
            board.complete(id, Some(format!("{} done", id))).unwrap();
        }
        assert!(board.is_complete());
        assert!(board.get(StageId::Aggregation).duration_ms().is_some());
    }

    #[test]
    fn test_cannot_skip_ahead() {
        let mut board = StageBoard::new();
        let err = board.start(StageId::Implementation).unwrap_err();
        assert_eq!(
            err,
            StageTransitionError::PredecessorIncomplete {
                stage: StageId::Implementation,
                blocked_by: StageId::StrategyGeneration,
            }
        );
    }

    #[test]
    fn test_failure_blocks_later_stages() {
        let mut board = StageBoard::new();
        board.start(StageId::StrategyGeneration).unwrap();
        board.complete(StageId::StrategyGeneration, None).unwrap();
        board.start(StageId::ArchitectureSynthesis).unwrap();
        board
            .fail(StageId::ArchitectureSynthesis, "invalid JSON")
            .unwrap();

        let failed = board.failed_stage().unwrap();
        assert_eq!(failed.id, StageId::ArchitectureSynthesis);
        assert_eq!(failed.error.as_deref(), Some("invalid JSON"));
        assert_eq!(board.get(StageId::Implementation).status, StageStatus::Pending);
        assert!(board.start(StageId::Implementation).is_err());
    }

    #[test]
    fn test_complete_requires_running() {
        let mut board = StageBoard::new();
        let err = board.complete(StageId::StrategyGeneration, None).unwrap_err();
        assert!(matches!(
            err,
            StageTransitionError::InvalidTransition {
                from: StageStatus::Pending,
                to: StageStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_status_displays_as_error() {
        assert_eq!(StageStatus::Failed.to_string(), "error");
        assert_eq!(
            serde_json::to_string(&StageStatus::Failed).unwrap(),
            "\"error\""
        );
    }
}
