//! Task entities.
//!
//! A task owns a data view and the execution-state the interpreter
//! reads and writes: flow direction and mode, break level, revert
//! state, and the abort flag.

use narthex_core::{BreakLevel, FlowDirection, FlowMode, TaskId};
use narthex_program::Expr;
use serde::{Deserialize, Serialize};

/// One task in the task tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id
    pub id: TaskId,
    /// Parent task, `None` for the root
    pub parent: Option<TaskId>,
    /// Display name
    pub name: String,
    /// Current flow direction
    pub direction: FlowDirection,
    /// Current flow mode
    pub mode: FlowMode,
    /// Current break level
    pub break_level: BreakLevel,
    /// Whether the task is tearing down
    pub aborting: bool,
    /// End condition, re-evaluated by default processing
    pub end_condition: Option<Expr>,
    /// Operation index a revert started from, while revert is active
    revert_from: Option<usize>,
}

impl Task {
    /// Create a root task
    #[must_use]
    pub fn new(id: TaskId, name: &str) -> Self {
        Self {
            id,
            parent: None,
            name: name.to_string(),
            direction: FlowDirection::Forward,
            mode: FlowMode::Fast,
            break_level: BreakLevel::Idle,
            aborting: false,
            end_condition: None,
            revert_from: None,
        }
    }

    /// Set the parent task
    #[must_use]
    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the end condition
    #[must_use]
    pub fn with_end_condition(mut self, condition: Expr) -> Self {
        self.end_condition = Some(condition);
        self
    }

    /// Whether a revert pass is active
    #[must_use]
    pub const fn revert_active(&self) -> bool {
        self.revert_from.is_some()
    }

    /// Operation index the active revert started from
    #[must_use]
    pub const fn revert_from(&self) -> Option<usize> {
        self.revert_from
    }

    /// Begin a revert pass: flip direction and remember where it
    /// started
    pub fn enter_revert(&mut self, from_index: usize) {
        self.revert_from = Some(from_index);
        self.direction = self.direction.reversed();
    }

    /// End the revert pass and restore the forward direction
    pub fn clear_revert(&mut self) {
        self.revert_from = None;
        self.direction = FlowDirection::Forward;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new(TaskId::from_name("orders"), "orders");
        assert!(task.parent.is_none());
        assert_eq!(task.direction, FlowDirection::Forward);
        assert_eq!(task.break_level, BreakLevel::Idle);
        assert!(!task.aborting);
        assert!(!task.revert_active());
    }

    #[test]
    fn test_task_with_parent() {
        let root = TaskId::from_name("root");
        let task = Task::new(TaskId::from_name("child"), "child").with_parent(root);
        assert_eq!(task.parent, Some(root));
    }

    #[test]
    fn test_task_revert_round_trip() {
        let mut task = Task::new(TaskId::new(), "t");
        task.enter_revert(4);

        assert!(task.revert_active());
        assert_eq!(task.revert_from(), Some(4));
        assert_eq!(task.direction, FlowDirection::Backward);

        task.clear_revert();
        assert!(!task.revert_active());
        assert_eq!(task.direction, FlowDirection::Forward);
    }
}
