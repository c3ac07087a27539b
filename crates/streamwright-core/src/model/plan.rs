//! Plan attached to a chat session
//!
//! Steps arrive by index, titles first and descriptions once a step is
//! worked out. Indices may arrive out of order, so steps are slotted.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::parts::PlanStep;
use crate::types::SessionId;

/// Step status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStepEntry {
    pub index: usize,
    pub title: String,
    pub description: String,
    pub is_last: bool,
    pub status: StepStatus,
}

pub struct PlanModel {
    session_id: SessionId,
    steps: RwLock<Vec<Option<PlanStepEntry>>>,
}

impl PlanModel {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            steps: RwLock::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Insert or update the step at `step.index`
    ///
    /// An empty title or description never overwrites a known one.
    pub fn update_step(&self, step: &PlanStep) {
        let mut steps = self.steps.write();
        if steps.len() <= step.index {
            steps.resize(step.index + 1, None);
        }
        let slot = &mut steps[step.index];
        let entry = slot.get_or_insert_with(|| PlanStepEntry {
            index: step.index,
            title: String::new(),
            description: String::new(),
            is_last: false,
            status: StepStatus::Pending,
        });
        if !step.title.is_empty() {
            entry.title = step.title.clone();
        }
        if !step.description.is_empty() {
            entry.description = step.description.clone();
            entry.status = StepStatus::Completed;
        }
        entry.is_last |= step.is_last;
    }

    /// Known steps in index order
    pub fn steps(&self) -> Vec<PlanStepEntry> {
        self.steps.read().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.steps.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .read()
            .iter()
            .flatten()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}
