//! Flow direction, flow mode and break levels.
//!
//! Direction and mode are task-level state; operations carry guards
//! against them (see the program crate). Break levels are the coarse
//! execution context saved and restored around handler invocations.

use serde::{Deserialize, Serialize};

/// Execution direction of a task
///
/// Governs block-resume reverse scanning and cross-control validation
/// traversal order. There is no distinct "none" state; an unset
/// direction reads as `Forward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    /// Normal top-to-bottom interpretation
    Forward,
    /// Reverse interpretation, active during revert
    Backward,
}

impl FlowDirection {
    /// The opposite direction
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    /// Whether this is the forward direction
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Forward)
    }
}

impl Default for FlowDirection {
    fn default() -> Self {
        Self::Forward
    }
}

/// Execution mode of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowMode {
    /// Normal uninterrupted interpretation
    Fast,
    /// Single-step interpretation
    Step,
}

impl Default for FlowMode {
    fn default() -> Self {
        Self::Fast
    }
}

/// Coarse break level of a task
///
/// Identifies which lifecycle scope is currently interpreting. Saved
/// on handler entry and restored on every exit path, including abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakLevel {
    /// Not interpreting
    Idle,
    /// Task prefix/suffix scope
    Task,
    /// Record prefix/suffix scope
    Record,
    /// Control prefix/suffix/verification scope
    Control,
    /// User event handler scope
    Handler,
}

impl Default for BreakLevel {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for BreakLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Task => "task",
            Self::Record => "record",
            Self::Control => "control",
            Self::Handler => "handler",
        };
        write!(f, "{}", name)
    }
}
