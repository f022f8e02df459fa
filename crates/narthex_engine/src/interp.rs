//! The operation interpreter.
//!
//! Walks one handler's table in the task's current direction,
//! maintaining a block-frame stack for if/else chains and loops and a
//! loop-counter stack that unwinds cleanly on abort. When a server
//! stack is pending, the walk skips the already-executed region
//! structurally: whole constructs lying before the resume boundary are
//! jumped over their end, constructs containing it are entered on the
//! branch the server chose, without re-evaluating conditions.

use crate::dispatch::EventsManager;
use crate::error::EngineResult;
use crate::event::{EventArg, RuntimeEvent};
use crate::external;
use crate::handler::EventHandler;
use crate::stack::{reconcile, Reconciliation, StackEntry};
use narthex_core::{EventTarget, FieldId, FlowDirection, Value};
use narthex_model::Workspace;
use narthex_program::{
    ExecSite, Expr, Operation, OperationKind, RaiseEventSpec, VerifyMode, SERVER_ID_BLANK,
};
use narthex_remote::{RemoteOp, RemoteRequest, RemoteSite};
use tracing::{debug, error, warn};

/// What one handler run produced
pub(crate) struct RunOutcome {
    /// The chain aborted via stop-execution
    pub aborted: bool,
    /// Interpretation stopped at a server-resume boundary; operations
    /// from this index on count as executed
    pub resume_hint: Option<usize>,
}

impl RunOutcome {
    const fn completed() -> Self {
        Self {
            aborted: false,
            resume_hint: None,
        }
    }

    const fn aborted() -> Self {
        Self {
            aborted: true,
            resume_hint: None,
        }
    }

    const fn exhausted(at: usize) -> Self {
        Self {
            aborted: false,
            resume_hint: Some(at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Branch,
    Loop,
}

#[derive(Debug, Clone, Copy)]
struct BlockFrame {
    kind: FrameKind,
    header: usize,
    close: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
struct ResumeState {
    /// Server sequence id to resume at
    boundary: u32,
    /// The server stack continues below this scope
    deeper: bool,
}

/// What the pending server stack means for one scope
enum Guidance {
    /// No server stack; interpret purely locally
    Proceed,
    /// Skip until the boundary
    Resume { boundary: u32, deeper: bool },
    /// Everything left in this scope already ran remotely
    ExhaustScope,
}

/// One step's effect on the program counter
enum Step {
    Advance,
    Jump(usize),
    Abort,
}

/// Interpret `[from, to)` of a handler's table
pub(crate) fn run_operations(
    mgr: &mut EventsManager,
    ws: &mut Workspace,
    remote: &mut dyn RemoteSite,
    handler: &EventHandler,
    event: &RuntimeEvent,
    resumed_from_server: bool,
    from: usize,
    to: usize,
) -> EngineResult<RunOutcome> {
    let depth = mgr.stack().depth();
    let limit = to.min(handler.table.len());
    let mut runner = Runner {
        mgr,
        ws,
        remote,
        handler,
        event,
        depth,
        limit,
        frames: Vec::new(),
        loop_counters: Vec::new(),
        resume: None,
    };

    if resumed_from_server {
        match runner.consult_server_stack() {
            Guidance::Proceed => {}
            Guidance::Resume { boundary, deeper } => {
                runner.resume = Some(ResumeState { boundary, deeper });
            }
            Guidance::ExhaustScope => return Ok(RunOutcome::exhausted(from)),
        }
    }

    runner.run(from)
}

struct Runner<'a> {
    mgr: &'a mut EventsManager,
    ws: &'a mut Workspace,
    remote: &'a mut dyn RemoteSite,
    handler: &'a EventHandler,
    event: &'a RuntimeEvent,
    /// Enclosing stack depth when this handler started; the server
    /// frame at this depth, if any, belongs to this scope
    depth: usize,
    /// Exclusive upper bound of the walk
    limit: usize,
    frames: Vec<BlockFrame>,
    loop_counters: Vec<u64>,
    resume: Option<ResumeState>,
}

impl Runner<'_> {
    fn consult_server_stack(&self) -> Guidance {
        let Some(frames) = self.mgr.server_frames() else {
            return Guidance::Proceed;
        };
        let Some(frame) = frames.get(self.depth) else {
            return Guidance::ExhaustScope;
        };
        if frame.task == self.handler.task && frame.handler == self.handler.id {
            Guidance::Resume {
                boundary: frame.position,
                deeper: frames.len() > self.depth + 1,
            }
        } else {
            Guidance::ExhaustScope
        }
    }

    fn run(&mut self, from: usize) -> EngineResult<RunOutcome> {
        let handler = self.handler;
        let mut pc = from;

        loop {
            let direction = self.ws.task(handler.task)?.direction;

            if direction.is_forward() {
                // A finished branch body jumps over the rest of its chain
                if let Some(frame) = self.frames.last() {
                    if frame.kind == FrameKind::Branch && pc == frame.close && frame.close != frame.end
                    {
                        let end = frame.end;
                        self.frames.pop();
                        pc = end;
                        continue;
                    }
                }
                if pc >= self.limit {
                    break;
                }
            } else if pc < from || pc >= self.limit {
                break;
            }

            let Some(op) = handler.table.get(pc) else {
                error!(handler = %handler.id, index = pc, "operation index out of range");
                break;
            };

            // Resume skipping: the region before the boundary already
            // ran remotely
            if let Some(state) = self.resume {
                match self.skip_step(pc, op, state)? {
                    SkipStep::Execute => {}
                    SkipStep::Jump(next) => {
                        pc = next;
                        continue;
                    }
                    SkipStep::Exhaust(at) => return Ok(RunOutcome::exhausted(at)),
                }
            }

            // Guards
            let mode = self.ws.task(handler.task)?.mode;
            if !op.mode_guard.allows(mode) || !op.direction_guard.allows(direction) {
                match self.advanced(pc, direction) {
                    Some(next) => pc = next,
                    None => break,
                }
                continue;
            }

            // Backward, block operations are structural only
            if !direction.is_forward() {
                match op.kind {
                    OperationKind::EndBlock => {
                        // Jump to the matching block header; the body
                        // is not re-run in reverse
                        match handler.table.matching_block_start(pc) {
                            Some(header) => {
                                pc = header;
                                continue;
                            }
                            None => {
                                error!(handler = %handler.id, index = pc, "unmatched end-block");
                                break;
                            }
                        }
                    }
                    OperationKind::BlockIf { .. }
                    | OperationKind::BlockElse { .. }
                    | OperationKind::BlockLoop { .. } => {
                        match self.advanced(pc, direction) {
                            Some(next) => pc = next,
                            None => break,
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            // Condition gate; server-site conditions are evaluated by
            // the delegate
            if op.site == ExecSite::Client && !op.condition.truthy(self.ws) {
                let skip_to = match op.kind {
                    OperationKind::BlockIf { block_close, .. }
                    | OperationKind::BlockElse { block_close, .. }
                        if direction.is_forward() =>
                    {
                        Some(block_close)
                    }
                    OperationKind::BlockLoop { block_end } if direction.is_forward() => {
                        Some(block_end)
                    }
                    _ => None,
                };
                match skip_to {
                    Some(target) => pc = target,
                    None => match self.advanced(pc, direction) {
                        Some(next) => pc = next,
                        None => break,
                    },
                }
                continue;
            }

            match self.exec(pc, op, direction)? {
                Step::Advance => {
                    // Direction may have flipped mid-operation
                    let direction = self.ws.task(handler.task)?.direction;
                    match self.advanced(pc, direction) {
                        Some(next) => pc = next,
                        None => break,
                    }
                }
                Step::Jump(target) => pc = target,
                Step::Abort => return Ok(RunOutcome::aborted()),
            }
        }

        // A completed backward walk is the end of the revert pass: the
        // cleanup ran once, now the chain aborts
        let reverting = {
            let task = self.ws.task_mut(handler.task)?;
            if task.revert_active() {
                task.clear_revert();
                true
            } else {
                false
            }
        };
        if reverting {
            self.mgr.stop_execution(self.ws);
            return Ok(RunOutcome::aborted());
        }

        Ok(RunOutcome::completed())
    }

    fn advanced(&self, pc: usize, direction: FlowDirection) -> Option<usize> {
        if direction.is_forward() {
            Some(pc + 1)
        } else if pc == 0 {
            None
        } else {
            Some(pc - 1)
        }
    }

    fn skip_step(&mut self, pc: usize, op: &Operation, state: ResumeState) -> EngineResult<SkipStep> {
        // At or past the boundary: resume live interpretation
        if op.server_id != SERVER_ID_BLANK && op.server_id >= state.boundary {
            self.resume = None;
            if state.deeper {
                if !is_nesting(op) {
                    debug!(
                        handler = %self.handler.id,
                        index = pc,
                        "server stack points below a non-nesting operation; scope counts as executed"
                    );
                    return Ok(SkipStep::Exhaust(pc));
                }
                // Execute the nesting operation; its nested dispatch
                // consumes the deeper frames
            } else {
                // Depth parity reached: client and server positions
                // are synchronized
                self.mgr.clear_server_stack();
            }
            return Ok(SkipStep::Execute);
        }

        // Still inside the already-executed region
        let Some(target) = self.handler.table.index_at_or_after(state.boundary) else {
            // The server ran past the last transmitted operation
            self.resume = None;
            if !state.deeper {
                self.mgr.clear_server_stack();
            }
            return Ok(SkipStep::Exhaust(self.limit));
        };

        if op.is_block_open() {
            let end = op.block_end().unwrap_or(pc);
            if target > end {
                // The whole construct already ran; its end-block is a
                // forward no-op
                return Ok(SkipStep::Jump(end));
            }
            // The boundary lies inside: enter on the branch the server
            // chose, without evaluating conditions
            if matches!(op.kind, OperationKind::BlockLoop { .. }) {
                self.frames.push(BlockFrame {
                    kind: FrameKind::Loop,
                    header: pc,
                    close: end,
                    end,
                });
                self.loop_counters.push(1);
                return Ok(SkipStep::Jump(pc + 1));
            }
            let mut branch = pc;
            loop {
                let close = self
                    .handler
                    .table
                    .get(branch)
                    .and_then(Operation::block_close)
                    .unwrap_or(end);
                if target < close {
                    self.frames.push(BlockFrame {
                        kind: FrameKind::Branch,
                        header: branch,
                        close,
                        end,
                    });
                    return Ok(SkipStep::Jump(branch + 1));
                }
                if close >= end || target == close {
                    return Ok(SkipStep::Jump(target.min(end)));
                }
                branch = close;
            }
        }

        if op.is_end_block() {
            // Leave the construct we skipped through
            if let Some(frame) = self.frames.last() {
                if frame.end == pc {
                    if frame.kind == FrameKind::Loop {
                        self.loop_counters.pop();
                    }
                    self.frames.pop();
                }
            }
        }
        Ok(SkipStep::Jump(pc + 1))
    }

    fn exec(&mut self, pc: usize, op: &Operation, direction: FlowDirection) -> EngineResult<Step> {
        // Server-site operations delegate wholesale; a server-site
        // branch opener delegates the branch decision
        if op.site == ExecSite::Server && !op.is_end_block() {
            return self.delegate(pc, op);
        }

        match &op.kind {
            OperationKind::Verify { mode, message } => self.exec_verify(pc, *mode, message),
            OperationKind::BlockIf {
                block_close,
                block_end,
            }
            | OperationKind::BlockElse {
                block_close,
                block_end,
            } => {
                self.frames.push(BlockFrame {
                    kind: FrameKind::Branch,
                    header: pc,
                    close: *block_close,
                    end: *block_end,
                });
                Ok(Step::Jump(pc + 1))
            }
            OperationKind::BlockLoop { block_end } => {
                self.frames.push(BlockFrame {
                    kind: FrameKind::Loop,
                    header: pc,
                    close: *block_end,
                    end: *block_end,
                });
                self.loop_counters.push(1);
                Ok(Step::Jump(pc + 1))
            }
            OperationKind::EndBlock => self.exec_end_block(pc),
            OperationKind::Evaluate { field, expr } => {
                let value = expr.eval(self.ws);
                self.data_write(*field, value);
                Ok(Step::Advance)
            }
            OperationKind::Update {
                field,
                expr,
                incremental,
            } => self.exec_update(pc, op, *field, expr, *incremental, direction),
            OperationKind::InvokeExternal {
                command,
                args,
                return_field,
            } => {
                let code = external::invoke(command, args);
                if let Some(field) = return_field {
                    self.data_write(*field, Value::Numeric(code as f64));
                }
                Ok(Step::Advance)
            }
            OperationKind::RaiseEvent(spec) => self.exec_raise(pc, op, spec),
            OperationKind::ServerOperation { .. } | OperationKind::Call { .. } => {
                self.delegate(pc, op)
            }
        }
    }

    fn exec_verify(&mut self, pc: usize, mode: VerifyMode, message: &str) -> EngineResult<Step> {
        let revert_active = self.ws.task(self.handler.task)?.revert_active();
        match mode {
            VerifyMode::Warning => {
                warn!(handler = %self.handler.id, message, "verify warning");
                Ok(Step::Advance)
            }
            VerifyMode::Error => {
                if revert_active {
                    // The remainder of the block still runs once
                    warn!(handler = %self.handler.id, message, "verify failed during revert");
                    Ok(Step::Advance)
                } else {
                    warn!(handler = %self.handler.id, message, "verify failed, aborting chain");
                    self.mgr.stop_execution(self.ws);
                    Ok(Step::Abort)
                }
            }
            VerifyMode::Revert => {
                if revert_active {
                    warn!(handler = %self.handler.id, message, "verify failed during revert");
                } else {
                    warn!(handler = %self.handler.id, message, "verify failed, reverting");
                    self.ws.task_mut(self.handler.task)?.enter_revert(pc);
                }
                Ok(Step::Advance)
            }
        }
    }

    fn exec_end_block(&mut self, pc: usize) -> EngineResult<Step> {
        let Some(frame) = self.frames.last().copied() else {
            return Ok(Step::Advance);
        };
        if frame.end != pc {
            return Ok(Step::Advance);
        }
        match frame.kind {
            FrameKind::Loop => {
                let again = self
                    .handler
                    .table
                    .get(frame.header)
                    .is_some_and(|header| header.condition.truthy(self.ws));
                if again {
                    if let Some(counter) = self.loop_counters.last_mut() {
                        *counter += 1;
                    }
                    return Ok(Step::Jump(frame.header + 1));
                }
                self.frames.pop();
                self.loop_counters.pop();
            }
            FrameKind::Branch => {
                self.frames.pop();
            }
        }
        Ok(Step::Advance)
    }

    fn exec_update(
        &mut self,
        pc: usize,
        op: &Operation,
        field: FieldId,
        expr: &Expr,
        incremental: bool,
        direction: FlowDirection,
    ) -> EngineResult<Step> {
        let linked = self.ws.field(field).map(|f| f.linked).unwrap_or(false);
        if incremental && linked {
            // Incremental update of a linked field is never performed
            // locally
            return self.delegate_op(
                pc,
                op,
                RemoteOp::LinkedUpdate {
                    field,
                    server_id: op.server_id,
                },
            );
        }

        let value = if incremental {
            // Forward accumulates the delta; the revert pass takes the
            // old contribution back out
            let delta = expr.eval(self.ws);
            let current = self.ws.field_value(field).unwrap_or(Value::Null);
            if direction.is_forward() {
                current.add(&delta)
            } else {
                current.subtract(&delta)
            }
        } else {
            expr.eval(self.ws)
        };
        self.data_write(field, value);
        Ok(Step::Advance)
    }

    fn exec_raise(&mut self, pc: usize, op: &Operation, spec: &RaiseEventSpec) -> EngineResult<Step> {
        let args: Vec<EventArg> = spec
            .args
            .iter()
            .map(|arg| match arg {
                Expr::Skip => EventArg::Skip,
                // Wait-mode events pass fields by reference so results
                // copy back; everything else is a value snapshot
                Expr::Field(field) if spec.wait => EventArg::Ref(*field),
                other => EventArg::Value(other.eval(self.ws)),
            })
            .collect();
        let target = if spec.target.is_some() {
            spec.target
        } else {
            EventTarget::Task(self.handler.task)
        };
        let mut event = RuntimeEvent::new(spec.kind).with_target(target).with_args(args);
        event.code = spec.code;

        if spec.wait {
            self.mgr.stack_mut().push(StackEntry::new(
                self.handler.task,
                self.handler.id,
                pc,
                op.server_id,
            ));
            let resuming = self.mgr.has_server_stack();
            let result = self
                .mgr
                .dispatch(&mut *self.ws, &mut *self.remote, event, resuming);
            self.mgr.stack_mut().pop();
            result?;
            if self.mgr.is_stopped() {
                return Ok(Step::Abort);
            }
            if let Some(step) = self.after_nested(pc, op) {
                return Ok(step);
            }
        } else {
            self.mgr.queue_handle().enqueue(event);
        }
        Ok(Step::Advance)
    }

    fn delegate(&mut self, pc: usize, op: &Operation) -> EngineResult<Step> {
        let remote_op = match &op.kind {
            OperationKind::Call { handler, .. } => RemoteOp::Call {
                handler: *handler,
                server_id: op.server_id,
            },
            OperationKind::BlockIf { .. }
            | OperationKind::BlockElse { .. }
            | OperationKind::BlockLoop { .. } => RemoteOp::Branch {
                server_id: op.server_id,
            },
            _ => RemoteOp::Operation {
                server_id: op.server_id,
            },
        };
        self.delegate_op(pc, op, remote_op)
    }

    fn delegate_op(&mut self, pc: usize, op: &Operation, remote_op: RemoteOp) -> EngineResult<Step> {
        self.mgr.stack_mut().push(StackEntry::new(
            self.handler.task,
            self.handler.id,
            pc,
            op.server_id,
        ));
        let request = RemoteRequest::new(self.mgr.stack().to_wire(), remote_op);

        let response = match self.remote.execute(request) {
            Ok(response) => response,
            Err(err) => {
                self.mgr.stack_mut().pop();
                warn!(%err, "remote call failed, aborting chain");
                self.mgr.stop_execution(self.ws);
                return Err(err.into());
            }
        };
        if !response.success {
            self.mgr.stack_mut().pop();
            warn!(
                error = response.error.as_deref().unwrap_or("unspecified"),
                "remote execution failed, aborting chain"
            );
            self.mgr.stop_execution(self.ws);
            return Ok(Step::Abort);
        }

        match reconcile(self.mgr.stack(), &response.executed) {
            Reconciliation::InSync => {
                self.mgr.stack_mut().pop();
                self.mgr.clear_server_stack();
                if op.is_block_open() {
                    // The server evaluated the chain and executed no
                    // body operation: skip the whole construct
                    Ok(Step::Jump(op.block_end().unwrap_or(pc + 1)))
                } else {
                    Ok(Step::Advance)
                }
            }
            Reconciliation::ResumeWithin { position } => {
                self.mgr.stack_mut().pop();
                self.mgr.set_server_stack(response.executed);
                self.resume = Some(ResumeState {
                    boundary: position,
                    deeper: false,
                });
                // Reprocess this operation in skip mode; for a branch
                // opener that selects the branch the server chose
                Ok(Step::Jump(pc))
            }
            Reconciliation::ResumeDeeper { task, handler, position } => {
                debug!(%task, %handler, position, "server stopped inside a nested invocation");
                self.mgr.set_server_stack(response.executed);
                let Some(nested) = self.mgr.handler_ref(handler) else {
                    error!(%handler, "server resumed into an unknown handler");
                    self.mgr.stack_mut().pop();
                    self.mgr.clear_server_stack();
                    return Ok(Step::Jump(self.limit));
                };
                // Our frame stays pushed: the nested handler reads the
                // server frame one below ours
                let result = nested.execute(
                    &mut *self.mgr,
                    &mut *self.ws,
                    &mut *self.remote,
                    self.event,
                    true,
                    true,
                );
                self.mgr.stack_mut().pop();
                result?;
                if self.mgr.is_stopped() {
                    return Ok(Step::Abort);
                }
                if let Some(step) = self.after_nested(pc, op) {
                    return Ok(step);
                }
                Ok(Step::Advance)
            }
            Reconciliation::Exhausted => {
                self.mgr.stack_mut().pop();
                debug!(handler = %self.handler.id, "server stack did not match; scope counts as executed");
                // Outer scopes consult their own frames after we return
                self.mgr.set_server_stack(response.executed);
                Ok(Step::Jump(self.limit))
            }
        }
    }

    /// Re-consult the server stack after a nested invocation returned
    fn after_nested(&mut self, pc: usize, op: &Operation) -> Option<Step> {
        if !self.mgr.has_server_stack() {
            return None;
        }
        match self.consult_server_stack() {
            Guidance::Proceed => None,
            Guidance::Resume { boundary, deeper } => {
                if boundary <= op.server_id {
                    // The nested invocation consumed everything it could
                    self.mgr.clear_server_stack();
                    None
                } else {
                    self.resume = Some(ResumeState { boundary, deeper });
                    Some(Step::Jump(pc))
                }
            }
            Guidance::ExhaustScope => Some(Step::Jump(self.limit)),
        }
    }

    /// Unknown fields in data operations are upstream construction
    /// defects: logged, skipped
    fn data_write(&mut self, field: FieldId, value: Value) {
        if let Err(err) = self.ws.set_field_value(field, value) {
            error!(handler = %self.handler.id, %err, "data operation referenced an unknown field");
        }
    }
}

enum SkipStep {
    /// The resume point is here; execute this operation
    Execute,
    /// Keep skipping from the given index
    Jump(usize),
    /// The rest of the scope counts as executed
    Exhaust(usize),
}

/// Whether an operation can carry a nested invocation the server may
/// have descended into
fn is_nesting(op: &Operation) -> bool {
    op.site == ExecSite::Server
        || matches!(
            op.kind,
            OperationKind::Call { .. }
                | OperationKind::ServerOperation { .. }
                | OperationKind::RaiseEvent(RaiseEventSpec { wait: true, .. })
        )
}
