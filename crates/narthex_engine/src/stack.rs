//! The execution stack and client-server reconciliation.
//!
//! One frame per nested raise-event/call invocation, pushed on entry
//! and popped on every exit path, including abort. The server may
//! execute a contiguous suffix of operations - including inside nested
//! chains - before returning; reconciliation compares the local stack
//! frame-by-frame against the server's reported stack to find the
//! exact operation to resume at, without re-executing or skipping any.

use narthex_core::{HandlerId, TaskId};
use narthex_remote::ServerFrame;
use serde::{Deserialize, Serialize};

/// One frame of a nested invocation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    /// Task of the invocation
    pub task: TaskId,
    /// Handler of the invocation
    pub handler: HandlerId,
    /// Local index of the invoking operation
    pub operation_index: usize,
    /// Server sequence id of the invoking operation
    pub server_id: u32,
}

impl StackEntry {
    /// Create a frame
    #[must_use]
    pub const fn new(task: TaskId, handler: HandlerId, operation_index: usize, server_id: u32) -> Self {
        Self {
            task,
            handler,
            operation_index,
            server_id,
        }
    }

    /// The frame in server coordinates
    #[must_use]
    pub const fn to_wire(&self) -> ServerFrame {
        ServerFrame::new(self.task, self.handler, self.server_id)
    }

    /// Loose frame comparison
    ///
    /// The server never transmits blank operations, so its reported
    /// position may be earlier than the local operation's own sequence
    /// id; later-or-equal counts as the same frame.
    #[must_use]
    pub fn matches(&self, server: &ServerFrame) -> bool {
        self.task == server.task && self.handler == server.handler && self.server_id >= server.position
    }
}

/// Ordered frames identifying the current nested-invocation path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStack {
    frames: Vec<StackEntry>,
}

impl ExecutionStack {
    /// Create an empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame on entering a nested invocation
    pub fn push(&mut self, entry: StackEntry) {
        self.frames.push(entry);
    }

    /// Pop the innermost frame on leaving a nested invocation
    pub fn pop(&mut self) -> Option<StackEntry> {
        self.frames.pop()
    }

    /// Current depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no invocation is nested
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All frames, outermost first
    #[must_use]
    pub fn frames(&self) -> &[StackEntry] {
        &self.frames
    }

    /// The stack in server coordinates, for attaching to a request
    #[must_use]
    pub fn to_wire(&self) -> Vec<ServerFrame> {
        self.frames.iter().map(StackEntry::to_wire).collect()
    }
}

/// Outcome of comparing the local stack against the server's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Client and server positions are synchronized; interpretation
    /// proceeds purely locally
    InSync,
    /// The server continued within the innermost shared handler; skip
    /// until the operation whose sequence id is at or past `position`
    ResumeWithin {
        /// Server sequence id to resume at
        position: u32,
    },
    /// The server entered a nested invocation the client has not; the
    /// extra frame is the resume point
    ResumeDeeper {
        /// Task of the extra frame
        task: TaskId,
        /// Handler of the extra frame
        handler: HandlerId,
        /// Server sequence id to resume at inside that handler
        position: u32,
    },
    /// Matching failed; all remaining operations in the current scope
    /// count as already executed
    Exhausted,
}

/// Compare the local stack against a server-reported stack,
/// outermost first
#[must_use]
pub fn reconcile(local: &ExecutionStack, server: &[ServerFrame]) -> Reconciliation {
    let depth = local.depth();

    if server.len() < depth {
        return Reconciliation::Exhausted;
    }

    // Frames above the innermost local one must match exactly
    let shared = depth.saturating_sub(1);
    for (ours, theirs) in local.frames()[..shared].iter().zip(server) {
        if !ours.matches(theirs) {
            return Reconciliation::Exhausted;
        }
    }

    if server.len() == depth {
        if depth == 0 {
            return Reconciliation::InSync;
        }
        let ours = &local.frames()[depth - 1];
        let theirs = &server[depth - 1];
        if ours.task != theirs.task || ours.handler != theirs.handler {
            return Reconciliation::Exhausted;
        }
        if ours.server_id >= theirs.position {
            return Reconciliation::InSync;
        }
        return Reconciliation::ResumeWithin {
            position: theirs.position,
        };
    }

    // Server is deeper: the innermost local frame must still match
    if depth > 0 && !local.frames()[depth - 1].matches(&server[depth - 1]) {
        return Reconciliation::Exhausted;
    }
    let extra = &server[depth];
    Reconciliation::ResumeDeeper {
        task: extra.task,
        handler: extra.handler,
        position: extra.position,
    }
}
