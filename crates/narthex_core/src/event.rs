//! Event classification types.
//!
//! The runtime event envelope itself lives in the engine crate; the
//! pure classification enums live here so that operation templates
//! (raise-event operations) can name them without a cycle.

use crate::id::{ControlId, FieldId, TaskId};
use serde::{Deserialize, Serialize};

/// Kind of a runtime event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Engine lifecycle event, keyed by an internal code
    Internal,
    /// Host window-system event
    System,
    /// User-defined event
    User,
    /// Timer expiration
    Timer,
    /// Expression-triggered event
    Expression,
    /// Menu entry invoking a program
    MenuProgram,
    /// Menu entry invoking an OS command
    MenuOsCommand,
}

/// Internal lifecycle codes for `EventKind::Internal`
///
/// Default before/after processing in the dispatch loop keys on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalCode {
    /// Task is opening
    TaskPrefix,
    /// Task is closing
    TaskSuffix,
    /// Record cursor entered a record
    RecordPrefix,
    /// Record cursor is leaving a record
    RecordSuffix,
    /// Focus entered a control
    ControlPrefix,
    /// Focus is leaving a control
    ControlSuffix,
    /// Control content validation
    ControlVerification,
    /// A field value changed
    VariableChange,
    /// Incremental-locate keystroke
    IncrementalLocate,
    /// Move the record cursor forward
    MoveNext,
    /// Move the record cursor backward
    MovePrevious,
    /// Close the task
    Quit,
}

/// The entity a runtime event is aimed at
///
/// At most one of task/control/field; `None` lets the dispatcher
/// substitute the last-focused task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTarget {
    /// No explicit target
    None,
    /// A task
    Task(TaskId),
    /// A control on a form
    Control(ControlId),
    /// A data-view field
    Field(FieldId),
}

impl EventTarget {
    /// Whether any target is set
    #[must_use]
    pub const fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for EventTarget {
    fn default() -> Self {
        Self::None
    }
}

/// Queue ordering class of a runtime event
///
/// Lower classes drain first; within a class, insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Drains before everything else
    Expedite,
    /// Default class
    Normal,
    /// Drains last
    Low,
}

impl Default for EventPriority {
    fn default() -> Self {
        Self::Normal
    }
}
