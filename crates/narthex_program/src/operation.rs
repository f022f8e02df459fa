//! Operations - one interpretable instruction each.
//!
//! The tag set is closed: each variant carries only its own fields and
//! the interpreter matches exhaustively. Block variants carry their
//! structural indices; `block_close` names the next branch in an
//! if/else chain (or the end-block when there is none), `block_end`
//! names the matching end-block.

use crate::expr::Expr;
use narthex_core::{EventKind, EventTarget, FieldId, FlowDirection, FlowMode, HandlerId, InternalCode};
use serde::{Deserialize, Serialize};

/// Server sequence id marking a blank operation
///
/// Blank operations are never transmitted by the server and never
/// occupy an execution-stack frame; real ids are 1-based.
pub const SERVER_ID_BLANK: u32 = 0;

/// Severity of a verify operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyMode {
    /// Log the message, continue interpretation
    Warning,
    /// Abort the chain
    Error,
    /// Run the remainder of the handler once in reverse, then abort
    Revert,
}

/// Where the server's compiler placed an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecSite {
    /// Interpreted locally
    Client,
    /// Delegated to the remote collaborator
    Server,
}

impl Default for ExecSite {
    fn default() -> Self {
        Self::Client
    }
}

/// Flow-mode guard on an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeGuard {
    /// Runs only in fast mode
    Fast,
    /// Runs only in step mode
    Step,
    /// Runs in either mode
    Both,
}

impl ModeGuard {
    /// Whether the operation runs under the given task mode
    #[must_use]
    pub const fn allows(self, mode: FlowMode) -> bool {
        match self {
            Self::Both => true,
            Self::Fast => matches!(mode, FlowMode::Fast),
            Self::Step => matches!(mode, FlowMode::Step),
        }
    }
}

impl Default for ModeGuard {
    fn default() -> Self {
        Self::Both
    }
}

/// Direction guard on an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectionGuard {
    /// Runs only while the task flows forward
    Forward,
    /// Runs only while the task flows backward
    Backward,
    /// Runs in either direction
    Combined,
}

impl DirectionGuard {
    /// Whether the operation runs under the given task direction
    #[must_use]
    pub const fn allows(self, direction: FlowDirection) -> bool {
        match self {
            Self::Combined => true,
            Self::Forward => direction.is_forward(),
            Self::Backward => !direction.is_forward(),
        }
    }
}

impl Default for DirectionGuard {
    fn default() -> Self {
        Self::Combined
    }
}

/// Template for an event synthesized by a raise-event operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiseEventSpec {
    /// Kind of the synthesized event
    pub kind: EventKind,
    /// Internal code, for internal events
    pub code: Option<InternalCode>,
    /// Target of the synthesized event
    pub target: EventTarget,
    /// Argument expressions, evaluated at raise time
    pub args: Vec<Expr>,
    /// Dispatch immediately through the same loop vs enqueue
    pub wait: bool,
}

impl RaiseEventSpec {
    /// Template for a user event with no target
    #[must_use]
    pub fn user() -> Self {
        Self {
            kind: EventKind::User,
            code: None,
            target: EventTarget::None,
            args: Vec::new(),
            wait: false,
        }
    }

    /// Set the target
    #[must_use]
    pub fn with_target(mut self, target: EventTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the argument expressions
    #[must_use]
    pub fn with_args(mut self, args: Vec<Expr>) -> Self {
        self.args = args;
        self
    }

    /// Set the wait flag
    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Operation kind - the closed instruction set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Validation check; the condition is the trigger
    Verify {
        /// Severity when the condition holds
        mode: VerifyMode,
        /// Message logged or attached to the abort
        message: String,
    },
    /// Conditional block opener
    BlockIf {
        /// Next branch in the chain, or the end-block
        block_close: usize,
        /// Matching end-block
        block_end: usize,
    },
    /// Alternative branch of an if chain
    BlockElse {
        /// Next branch in the chain, or the end-block
        block_close: usize,
        /// Matching end-block
        block_end: usize,
    },
    /// Loop block opener; re-evaluates its condition each iteration
    BlockLoop {
        /// Matching end-block
        block_end: usize,
    },
    /// Block terminator; no-op forward, jump target backward
    EndBlock,
    /// Assign an expression result to a field
    Evaluate {
        /// Target field
        field: FieldId,
        /// Source expression
        expr: Expr,
    },
    /// Update a field; incremental updates accumulate
    Update {
        /// Target field
        field: FieldId,
        /// Source expression
        expr: Expr,
        /// Old-subtracted/new-added accumulation
        incremental: bool,
    },
    /// Run an out-of-process command
    InvokeExternal {
        /// Command to run
        command: String,
        /// Command arguments
        args: Vec<String>,
        /// Field receiving the numeric return code
        return_field: Option<FieldId>,
    },
    /// Synthesize a runtime event from a template
    RaiseEvent(RaiseEventSpec),
    /// Opaque operation executed by the remote collaborator
    ServerOperation {
        /// Server-side descriptor, not interpreted locally
        descriptor: String,
    },
    /// Invoke another handler, delegated to the remote collaborator
    Call {
        /// Target handler
        handler: HandlerId,
        /// Positional argument expressions; skip entries leave the
        /// parameter untouched
        args: Vec<Expr>,
    },
}

/// One interpretable instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Instruction payload
    pub kind: OperationKind,
    /// Gate condition; a false condition skips the operation
    pub condition: Expr,
    /// Flow-mode guard
    pub mode_guard: ModeGuard,
    /// Direction guard
    pub direction_guard: DirectionGuard,
    /// Execution site chosen by the server's compiler
    pub site: ExecSite,
    /// Position in the server's copy of the program; blank ops carry 0
    pub server_id: u32,
}

impl Operation {
    /// Create an operation with an always-true condition, permissive
    /// guards, client site and a blank server id
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            condition: Expr::always(),
            mode_guard: ModeGuard::Both,
            direction_guard: DirectionGuard::Combined,
            site: ExecSite::Client,
            server_id: SERVER_ID_BLANK,
        }
    }

    /// Set the gate condition
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = condition;
        self
    }

    /// Set the server sequence id
    #[must_use]
    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    /// Set the execution site
    #[must_use]
    pub fn with_site(mut self, site: ExecSite) -> Self {
        self.site = site;
        self
    }

    /// Set the flow-mode guard
    #[must_use]
    pub fn with_mode_guard(mut self, guard: ModeGuard) -> Self {
        self.mode_guard = guard;
        self
    }

    /// Set the direction guard
    #[must_use]
    pub fn with_direction_guard(mut self, guard: DirectionGuard) -> Self {
        self.direction_guard = guard;
        self
    }

    /// Whether this operation opens a block
    #[must_use]
    pub const fn is_block_open(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::BlockIf { .. }
                | OperationKind::BlockElse { .. }
                | OperationKind::BlockLoop { .. }
        )
    }

    /// Whether this operation terminates a block
    #[must_use]
    pub const fn is_end_block(&self) -> bool {
        matches!(self.kind, OperationKind::EndBlock)
    }

    /// Close index of a block operation
    #[must_use]
    pub const fn block_close(&self) -> Option<usize> {
        match self.kind {
            OperationKind::BlockIf { block_close, .. }
            | OperationKind::BlockElse { block_close, .. } => Some(block_close),
            OperationKind::BlockLoop { block_end } => Some(block_end),
            _ => None,
        }
    }

    /// End index of a block operation
    #[must_use]
    pub const fn block_end(&self) -> Option<usize> {
        match self.kind {
            OperationKind::BlockIf { block_end, .. }
            | OperationKind::BlockElse { block_end, .. }
            | OperationKind::BlockLoop { block_end } => Some(block_end),
            _ => None,
        }
    }

    /// Whether the blank server id is set
    #[must_use]
    pub const fn is_blank(&self) -> bool {
        self.server_id == SERVER_ID_BLANK
    }

    /// Tag name, for diagnostics
    #[must_use]
    pub const fn tag_name(&self) -> &'static str {
        match self.kind {
            OperationKind::Verify { .. } => "verify",
            OperationKind::BlockIf { .. } => "block-if",
            OperationKind::BlockElse { .. } => "block-else",
            OperationKind::BlockLoop { .. } => "block-loop",
            OperationKind::EndBlock => "end-block",
            OperationKind::Evaluate { .. } => "evaluate",
            OperationKind::Update { .. } => "update",
            OperationKind::InvokeExternal { .. } => "invoke-external",
            OperationKind::RaiseEvent(_) => "raise-event",
            OperationKind::ServerOperation { .. } => "server-operation",
            OperationKind::Call { .. } => "call",
        }
    }
}
