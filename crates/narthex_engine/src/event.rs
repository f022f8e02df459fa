//! Runtime events.
//!
//! The envelope describing one occurrence to process. Events are
//! created by the GUI, timers, raise-event operations or the server;
//! consumed exactly once; discarded after their handler chain
//! completes.

use narthex_core::{
    EventKind, EventPriority, EventTarget, FieldId, InternalCode, TaskId, Value,
};
use narthex_model::Workspace;
use serde::{Deserialize, Serialize};

/// One event argument
///
/// Wait-mode raise-event operations pass field references so results
/// copy back to the caller; everything else is snapshotted by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventArg {
    /// Value snapshotted at raise time
    Value(Value),
    /// Reference to a caller field, bound and copied back
    Ref(FieldId),
    /// Skip entry; the bound parameter keeps its current value
    Skip,
}

impl EventArg {
    /// Resolve the argument against the workspace
    #[must_use]
    pub fn resolve(&self, ws: &Workspace) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Ref(field) => ws.field_value(*field),
            Self::Skip => None,
        }
    }
}

/// The envelope describing one occurrence to process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// Event kind
    pub kind: EventKind,
    /// Internal code, set for internal events
    pub code: Option<InternalCode>,
    /// Target entity
    pub target: EventTarget,
    /// Argument list
    pub args: Vec<EventArg>,
    /// Dispatch now instead of enqueueing
    pub immediate: bool,
    /// Queue ordering class
    pub priority: EventPriority,
    /// Protects the event from bulk queue-clearing
    pub from_server: bool,
}

impl RuntimeEvent {
    /// Create an event with no target, default priority
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            code: None,
            target: EventTarget::None,
            args: Vec::new(),
            immediate: false,
            priority: EventPriority::Normal,
            from_server: false,
        }
    }

    /// An internal lifecycle event
    #[must_use]
    pub fn internal(code: InternalCode) -> Self {
        let mut event = Self::new(EventKind::Internal);
        event.code = Some(code);
        event
    }

    /// A user event
    #[must_use]
    pub fn user() -> Self {
        Self::new(EventKind::User)
    }

    /// A timer expiration aimed at its owning task
    #[must_use]
    pub fn timer(task: TaskId) -> Self {
        Self::new(EventKind::Timer).with_target(EventTarget::Task(task))
    }

    /// Set the target
    #[must_use]
    pub fn with_target(mut self, target: EventTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the argument list
    #[must_use]
    pub fn with_args(mut self, args: Vec<EventArg>) -> Self {
        self.args = args;
        self
    }

    /// Set the priority class
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark for immediate dispatch
    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Mark as server-originated
    #[must_use]
    pub fn from_server(mut self) -> Self {
        self.from_server = true;
        self
    }

    /// Resolve the target to its owning task
    #[must_use]
    pub fn task_of(&self, ws: &Workspace) -> Option<TaskId> {
        match self.target {
            EventTarget::Task(task) => Some(task),
            EventTarget::Control(control) => ws.control(control).ok().map(|c| c.task),
            EventTarget::Field(field) => ws.field(field).ok().map(|f| f.task),
            EventTarget::None => None,
        }
    }
}

/// Producer-side description of a recurring timer
///
/// The host's timer machinery fires these; each expiration enqueues
/// one timer event aimed at the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    /// Task that owns the timer
    pub task: TaskId,
    /// Expiration interval in host ticks
    pub interval_ticks: u64,
}

impl TimerSpec {
    /// Create a timer description
    #[must_use]
    pub const fn new(task: TaskId, interval_ticks: u64) -> Self {
        Self {
            task,
            interval_ticks,
        }
    }

    /// The event one expiration produces
    #[must_use]
    pub fn event(&self) -> RuntimeEvent {
        RuntimeEvent::timer(self.task)
    }
}
