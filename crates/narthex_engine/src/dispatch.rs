//! The events manager - the outer dispatch loop.
//!
//! Owns the event queue, the stop-execution flag, the execution stack
//! and the pending server stack. Events are processed strictly one at
//! a time to full completion, including all nested chains: dispatch
//! resolves the target, runs default "before" processing, fires
//! matching handlers in strict tier order, then runs default "after"
//! processing.

use crate::error::{EngineError, EngineResult};
use crate::event::{EventArg, RuntimeEvent};
use crate::handler::{EventHandler, HandlerScope};
use crate::queue::EventQueue;
use crate::stack::ExecutionStack;
use indexmap::IndexMap;
use narthex_core::{
    ControlId, CoreError, EventKind, EventPriority, EventTarget, HandlerId, InternalCode, TaskId,
    Value,
};
use narthex_model::Workspace;
use narthex_remote::{RemoteSite, ServerFrame};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Keep server-originated events when an abort clears the queue
    pub preserve_server_events: bool,
    /// Maximum nested raise-event/call depth
    pub max_chain_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preserve_server_events: true,
            max_chain_depth: 32,
        }
    }
}

/// The stop-execution flag and the control it stopped on
#[derive(Debug, Default)]
struct StopState {
    stopped: bool,
    control: Option<ControlId>,
}

/// Outcome of default "before" processing
enum BeforeOutcome {
    /// The handler chain is skipped entirely
    Handled,
    /// The handler chain runs
    Continue,
}

/// The dispatch loop and its owned state
pub struct EventsManager {
    queue: EventQueue,
    handlers: IndexMap<HandlerId, Arc<EventHandler>>,
    stack: ExecutionStack,
    server_stack: Option<Vec<ServerFrame>>,
    stop: StopState,
    config: EngineConfig,
}

impl EventsManager {
    /// Create a manager with no handlers
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            queue: EventQueue::new(),
            handlers: IndexMap::new(),
            stack: ExecutionStack::new(),
            server_stack: None,
            stop: StopState::default(),
            config,
        }
    }

    /// Register a handler; declaration order is firing order within a
    /// tier
    ///
    /// # Errors
    ///
    /// Returns error if the id is already registered
    pub fn register_handler(&mut self, handler: EventHandler) -> EngineResult<()> {
        if self.handlers.contains_key(&handler.id) {
            return Err(CoreError::already_exists("Handler", handler.id).into());
        }
        self.handlers.insert(handler.id, Arc::new(handler));
        Ok(())
    }

    /// A producer handle onto the event queue
    #[must_use]
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub(crate) fn queue_handle(&self) -> &EventQueue {
        &self.queue
    }

    pub(crate) fn handler_ref(&self, id: HandlerId) -> Option<Arc<EventHandler>> {
        self.handlers.get(&id).cloned()
    }

    /// The execution stack
    #[must_use]
    pub fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut ExecutionStack {
        &mut self.stack
    }

    /// Whether stop-execution is raised
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.stopped
    }

    /// The control execution stopped on, while stopped
    #[must_use]
    pub fn stopped_control(&self) -> Option<ControlId> {
        self.stop.control
    }

    /// Raise stop-execution: the remainder of the current chain aborts
    /// and unwinds to the dispatch loop
    pub fn stop_execution(&mut self, ws: &Workspace) {
        self.stop.stopped = true;
        self.stop.control = ws.last_focused_control();
    }

    fn clear_stop(&mut self) {
        self.stop.stopped = false;
        self.stop.control = None;
    }

    /// Install a server-reported stack; the next dispatch resumes
    /// against it
    pub fn set_server_stack(&mut self, frames: Vec<ServerFrame>) {
        self.server_stack = Some(frames);
    }

    pub(crate) fn clear_server_stack(&mut self) {
        self.server_stack = None;
    }

    pub(crate) fn has_server_stack(&self) -> bool {
        self.server_stack.is_some()
    }

    pub(crate) fn server_frames(&self) -> Option<&[ServerFrame]> {
        self.server_stack.as_deref()
    }

    /// Raise an event: dispatch now when immediate, enqueue otherwise
    ///
    /// # Errors
    ///
    /// Returns error if immediate dispatch fails
    pub fn raise(
        &mut self,
        ws: &mut Workspace,
        remote: &mut dyn RemoteSite,
        event: RuntimeEvent,
    ) -> EngineResult<()> {
        if event.immediate {
            let resuming = self.server_stack.is_some();
            self.dispatch(ws, remote, event, resuming)
        } else {
            self.queue.enqueue(event);
            Ok(())
        }
    }

    /// Drain the queue, dispatching each event to full completion
    ///
    /// Stop-execution is cleared between events; the pending queue is
    /// bulk-cleared on abort, preserving server-originated events when
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns error only on faults that are neither structural nor
    /// remote; those are logged and the loop continues
    pub fn run(&mut self, ws: &mut Workspace, remote: &mut dyn RemoteSite) -> EngineResult<()> {
        while let Some(event) = self.queue.dequeue() {
            let resuming = self.server_stack.is_some();
            match self.dispatch(ws, remote, event, resuming) {
                Ok(()) => {}
                Err(err) if err.is_structural() => {
                    error!(%err, "internal engine error, event skipped");
                }
                Err(EngineError::Remote(err)) => {
                    warn!(%err, "remote fault aborted the chain");
                }
                Err(err) => return Err(err),
            }
            if self.stop.stopped {
                debug!("stop-execution raised, clearing pending events");
                self.queue.clear(self.config.preserve_server_events);
                self.clear_stop();
            }
        }
        Ok(())
    }

    /// Dispatch one event through default processing and the handler
    /// chain
    ///
    /// # Errors
    ///
    /// Returns error on remote faults (the chain is already aborted)
    /// and on chain-depth overflow
    pub fn dispatch(
        &mut self,
        ws: &mut Workspace,
        remote: &mut dyn RemoteSite,
        event: RuntimeEvent,
        resuming_from_server: bool,
    ) -> EngineResult<()> {
        if self.stack.depth() >= self.config.max_chain_depth {
            error!(limit = self.config.max_chain_depth, "event chain too deep, aborting");
            self.stop_execution(ws);
            return Err(EngineError::ChainDepthExceeded {
                limit: self.config.max_chain_depth,
            });
        }

        // Resolve the target; an event with none goes to the
        // last-focused task or is dropped
        let Some(task) = event.task_of(ws).or_else(|| ws.last_focused_task()) else {
            debug!(kind = ?event.kind, "event has no resolvable target, dropped");
            return Ok(());
        };
        debug!(kind = ?event.kind, code = ?event.code, %task, "dispatching event");

        match self.default_before(ws, &event, task) {
            Ok(BeforeOutcome::Handled) => {
                self.default_after(ws, &event, task)?;
                return Ok(());
            }
            Ok(BeforeOutcome::Continue) => {}
            Err(EngineError::Navigation { task: at, reason }) => {
                // Fatal for the task: exit with a message
                error!(task = %at, reason = %reason, "no parkable control reachable, exiting task");
                if let Ok(target) = ws.task_mut(at) {
                    target.aborting = true;
                }
                self.queue.enqueue(
                    RuntimeEvent::internal(InternalCode::Quit)
                        .with_target(EventTarget::Task(at))
                        .with_priority(EventPriority::Expedite),
                );
                self.stop_execution(ws);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if !self.stop.stopped {
            let plan = self.matching_handlers(ws, &event, task);
            for handler_id in plan {
                if self.stop.stopped {
                    break;
                }
                let Some(handler) = self.handler_ref(handler_id) else {
                    continue;
                };
                let began = resuming_from_server && self.server_began(handler_id);
                match handler.execute(&mut *self, ws, &mut *remote, &event, began, began) {
                    Ok(outcome) => {
                        if !outcome.propagate {
                            break;
                        }
                    }
                    Err(err) if err.is_structural() => {
                        error!(%err, handler = %handler_id, "handler skipped");
                    }
                    Err(EngineError::Remote(err)) => {
                        warn!(%err, handler = %handler_id, "chain aborted by remote fault");
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.default_after(ws, &event, task)?;

        // A finished top-level chain leaves no resume state behind
        if self.stack.is_empty() {
            self.clear_server_stack();
        }
        Ok(())
    }

    /// Whether the server already began running a handler at the
    /// current depth
    fn server_began(&self, handler: HandlerId) -> bool {
        self.server_stack
            .as_deref()
            .is_some_and(|frames| {
                frames
                    .get(self.stack.depth())
                    .is_some_and(|frame| frame.handler == handler)
            })
    }

    /// Resolve matching handlers in strict tier order: specific,
    /// non-specific, global-specific. Once a non-empty tier is found,
    /// lower tiers are not consulted.
    fn matching_handlers(
        &self,
        ws: &Workspace,
        event: &RuntimeEvent,
        task: TaskId,
    ) -> Vec<HandlerId> {
        let specific: Vec<HandlerId> = self
            .handlers
            .values()
            .filter(|h| {
                h.trigger.matches_base(event)
                    && h.trigger.is_specific()
                    && h.trigger.scope != HandlerScope::Global
                    && h.trigger.bound_target_matches(event, h.task)
            })
            .map(|h| h.id)
            .collect();
        if !specific.is_empty() {
            return specific;
        }

        let non_specific: Vec<HandlerId> = self
            .handlers
            .values()
            .filter(|h| {
                h.trigger.matches_base(event)
                    && !h.trigger.is_specific()
                    && match h.trigger.scope {
                        // Task scope requires the same task, except for
                        // timer events
                        HandlerScope::Task => h.task == task || event.kind == EventKind::Timer,
                        HandlerScope::Subtree => ws.is_ancestor(h.task, task),
                        HandlerScope::Global => true,
                    }
            })
            .map(|h| h.id)
            .collect();
        if !non_specific.is_empty() {
            return non_specific;
        }

        self.handlers
            .values()
            .filter(|h| {
                h.trigger.matches_base(event)
                    && h.trigger.is_specific()
                    && h.trigger.scope == HandlerScope::Global
                    && h.trigger.bound_target_matches(event, h.task)
            })
            .map(|h| h.id)
            .collect()
    }

    /// Default "before" processing, keyed on the internal code
    fn default_before(
        &mut self,
        ws: &mut Workspace,
        event: &RuntimeEvent,
        task: TaskId,
    ) -> EngineResult<BeforeOutcome> {
        let Some(code) = event.code else {
            return Ok(BeforeOutcome::Continue);
        };
        match code {
            InternalCode::TaskPrefix => {
                if let Some(control) = ws.first_parkable(task) {
                    ws.set_focus(control)?;
                }
                Ok(BeforeOutcome::Continue)
            }
            InternalCode::RecordPrefix => {
                if end_condition_met(ws, task)? {
                    debug!(%task, "end condition met before record entry");
                    self.queue.enqueue(quit_event(task));
                    return Ok(BeforeOutcome::Handled);
                }
                Ok(BeforeOutcome::Continue)
            }
            InternalCode::ControlPrefix => {
                if let EventTarget::Control(control) = event.target {
                    // A focus jump validates every control it passes
                    // over, in the task's current direction
                    if let Some(previous) = ws.last_focused_control() {
                        if previous != control {
                            let mut crossed = ws.controls_between(previous, control);
                            if !ws.task(task)?.direction.is_forward() {
                                crossed.reverse();
                            }
                            for crossed_control in crossed {
                                self.queue.enqueue(
                                    RuntimeEvent::internal(InternalCode::ControlVerification)
                                        .with_target(EventTarget::Control(crossed_control)),
                                );
                            }
                        }
                    }
                    if !ws.set_focus(control)? {
                        match ws.next_parkable(control) {
                            Some(next) => {
                                ws.set_focus(next)?;
                            }
                            None => {
                                return Err(EngineError::Navigation {
                                    task,
                                    reason: "focus entering a control".to_string(),
                                })
                            }
                        }
                    }
                }
                Ok(BeforeOutcome::Continue)
            }
            InternalCode::VariableChange => {
                if let EventTarget::Field(field) = event.target {
                    let owner = ws.field(field)?.task;
                    ws.view_mut(owner)?.mark_modified(field);
                }
                Ok(BeforeOutcome::Continue)
            }
            InternalCode::IncrementalLocate => {
                // Locate keystrokes never run a handler chain
                if let Some(EventArg::Value(Value::Alpha(fragment))) = event.args.first() {
                    ws.view_mut(task)?.push_locate(fragment);
                }
                Ok(BeforeOutcome::Handled)
            }
            InternalCode::MoveNext => {
                if ws.view_mut(task)?.move_next() {
                    Ok(BeforeOutcome::Continue)
                } else {
                    debug!(%task, "record cursor already at the last record");
                    Ok(BeforeOutcome::Handled)
                }
            }
            InternalCode::MovePrevious => {
                if ws.view_mut(task)?.move_previous() {
                    Ok(BeforeOutcome::Continue)
                } else {
                    debug!(%task, "record cursor already at the first record");
                    Ok(BeforeOutcome::Handled)
                }
            }
            InternalCode::Quit => {
                ws.task_mut(task)?.aborting = true;
                Ok(BeforeOutcome::Continue)
            }
            InternalCode::TaskSuffix
            | InternalCode::RecordSuffix
            | InternalCode::ControlSuffix
            | InternalCode::ControlVerification => Ok(BeforeOutcome::Continue),
        }
    }

    /// Default "after" processing: commit record state, advance focus,
    /// re-evaluate end conditions, queue a display refresh
    fn default_after(
        &mut self,
        ws: &mut Workspace,
        event: &RuntimeEvent,
        task: TaskId,
    ) -> EngineResult<()> {
        match event.code {
            Some(InternalCode::RecordSuffix) => {
                ws.view_mut(task)?.commit();
            }
            Some(InternalCode::ControlSuffix) => {
                if let EventTarget::Control(control) = event.target {
                    if let Some(next) = ws.next_parkable(control) {
                        ws.set_focus(next)?;
                    }
                }
            }
            _ => {}
        }

        if event.code != Some(InternalCode::Quit) {
            let aborting = ws.task(task)?.aborting;
            if !aborting && end_condition_met(ws, task)? {
                debug!(%task, "end condition met");
                self.queue.enqueue(quit_event(task));
            }
        }

        ws.request_refresh(task);
        Ok(())
    }
}

fn end_condition_met(ws: &Workspace, task: TaskId) -> EngineResult<bool> {
    let condition = ws.task(task)?.end_condition.clone();
    Ok(condition.is_some_and(|cond| cond.truthy(ws)))
}

fn quit_event(task: TaskId) -> RuntimeEvent {
    RuntimeEvent::internal(InternalCode::Quit)
        .with_target(EventTarget::Task(task))
        .with_priority(EventPriority::Expedite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EventTrigger;
    use narthex_core::FieldId;
    use narthex_model::{Control, Field, Task};
    use narthex_program::{Expr, Operation, OperationKind, OperationTable, RaiseEventSpec};
    use narthex_remote::{RemoteResponse, ScriptedSite, ServerFrame};

    fn make_test_world() -> (EventsManager, Workspace, ScriptedSite, TaskId) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut ws = Workspace::new();
        let task = TaskId::from_name("main");
        ws.add_task(Task::new(task, "main")).unwrap();
        (
            EventsManager::new(EngineConfig::default()),
            ws,
            ScriptedSite::new(),
            task,
        )
    }

    fn add_field(ws: &mut Workspace, task: TaskId, name: &str) -> FieldId {
        let id = FieldId::from_name(name);
        ws.add_field(Field::new(id, task, name)).unwrap();
        id
    }

    fn set_num(field: FieldId, value: f64) -> Operation {
        Operation::new(OperationKind::Evaluate {
            field,
            expr: Expr::lit(value),
        })
    }

    fn bump(field: FieldId) -> Operation {
        Operation::new(OperationKind::Update {
            field,
            expr: Expr::lit(1.0),
            incremental: true,
        })
    }

    fn handler_with(
        name: &str,
        task: TaskId,
        trigger: EventTrigger,
        ops: Vec<Operation>,
    ) -> EventHandler {
        EventHandler::new(
            HandlerId::from_name(name),
            task,
            trigger,
            OperationTable::new(ops).unwrap(),
        )
    }

    fn num(ws: &Workspace, field: FieldId) -> f64 {
        match ws.field_value(field) {
            Some(Value::Numeric(n)) => n,
            other => panic!("expected numeric value, got {:?}", other),
        }
    }

    fn is_unset(ws: &Workspace, field: FieldId) -> bool {
        ws.field_value(field) == Some(Value::Null)
    }

    #[test]
    fn test_specific_tier_shadows_nonspecific() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let control = ControlId::from_name("c");
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        let hit_specific = add_field(&mut ws, task, "hit_specific");
        let hit_plain = add_field(&mut ws, task, "hit_plain");

        mgr.register_handler(handler_with(
            "specific",
            task,
            EventTrigger::new(EventKind::User).bound_to_control(control),
            vec![set_num(hit_specific, 1.0)],
        ))
        .unwrap();
        mgr.register_handler(handler_with(
            "plain",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit_plain, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Control(control));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(num(&ws, hit_specific), 1.0);
        assert!(is_unset(&ws, hit_plain));
    }

    #[test]
    fn test_nonspecific_tier_fires_when_no_specific_matches() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let control = ControlId::from_name("c");
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        let hit = add_field(&mut ws, task, "hit");

        mgr.register_handler(handler_with(
            "plain",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Control(control));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(num(&ws, hit), 1.0);
    }

    #[test]
    fn test_global_specific_tier_is_consulted_last() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let control = ControlId::from_name("c");
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        let hit_specific = add_field(&mut ws, task, "hit_specific");
        let hit_global = add_field(&mut ws, task, "hit_global");

        mgr.register_handler(handler_with(
            "global_bound",
            task,
            EventTrigger::new(EventKind::User)
                .with_scope(HandlerScope::Global)
                .bound_to_control(control),
            vec![set_num(hit_global, 1.0)],
        ))
        .unwrap();
        mgr.register_handler(handler_with(
            "specific",
            task,
            EventTrigger::new(EventKind::User).bound_to_control(control),
            vec![set_num(hit_specific, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Control(control));
        mgr.dispatch(&mut ws, &mut site, event.clone(), false).unwrap();

        // The specific tier wins outright
        assert_eq!(num(&ws, hit_specific), 1.0);
        assert!(is_unset(&ws, hit_global));

        // Without a specific handler the global-specific tier fires
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        let hit_global = add_field(&mut ws, task, "hit_global");
        mgr.register_handler(handler_with(
            "global_bound",
            task,
            EventTrigger::new(EventKind::User)
                .with_scope(HandlerScope::Global)
                .bound_to_control(control),
            vec![set_num(hit_global, 1.0)],
        ))
        .unwrap();
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();
        assert_eq!(num(&ws, hit_global), 1.0);
    }

    #[test]
    fn test_declaration_order_stops_on_no_propagate() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let first = add_field(&mut ws, task, "first");
        let second = add_field(&mut ws, task, "second");

        mgr.register_handler(
            handler_with(
                "first",
                task,
                EventTrigger::new(EventKind::User),
                vec![set_num(first, 1.0)],
            )
            .with_propagate(Expr::never()),
        )
        .unwrap();
        mgr.register_handler(handler_with(
            "second",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(second, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(num(&ws, first), 1.0);
        assert!(is_unset(&ws, second));
    }

    #[test]
    fn test_disabled_handler_is_skipped_and_chain_continues() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let first = add_field(&mut ws, task, "first");
        let second = add_field(&mut ws, task, "second");

        mgr.register_handler(
            handler_with(
                "disabled",
                task,
                EventTrigger::new(EventKind::User),
                vec![set_num(first, 1.0)],
            )
            .with_enabled(Expr::never()),
        )
        .unwrap();
        mgr.register_handler(handler_with(
            "enabled",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(second, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert!(is_unset(&ws, first));
        assert_eq!(num(&ws, second), 1.0);
    }

    #[test]
    fn test_timer_events_cross_task_scope() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let other = TaskId::from_name("other");
        ws.add_task(Task::new(other, "other")).unwrap();
        let hit = add_field(&mut ws, other, "hit");

        mgr.register_handler(handler_with(
            "timer",
            other,
            EventTrigger::new(EventKind::Timer),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        // Task scope normally requires the same task; timer events are
        // the exception
        let event = RuntimeEvent::timer(task);
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(num(&ws, hit), 1.0);
    }

    #[test]
    fn test_subtree_scope_matches_descendants_only() {
        let (mut mgr, mut ws, mut site, parent) = make_test_world();
        let child = TaskId::from_name("child");
        ws.add_task(Task::new(child, "child").with_parent(parent))
            .unwrap();
        let unrelated = TaskId::from_name("unrelated");
        ws.add_task(Task::new(unrelated, "unrelated")).unwrap();
        let hit_parent = add_field(&mut ws, parent, "hit_parent");
        let hit_unrelated = add_field(&mut ws, unrelated, "hit_unrelated");

        mgr.register_handler(handler_with(
            "subtree",
            parent,
            EventTrigger::new(EventKind::User).with_scope(HandlerScope::Subtree),
            vec![set_num(hit_parent, 1.0)],
        ))
        .unwrap();
        mgr.register_handler(handler_with(
            "elsewhere",
            unrelated,
            EventTrigger::new(EventKind::User).with_scope(HandlerScope::Subtree),
            vec![set_num(hit_unrelated, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(child));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(num(&ws, hit_parent), 1.0);
        assert!(is_unset(&ws, hit_unrelated));
    }

    #[test]
    fn test_event_without_target_falls_back_to_focused_task() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let control = ControlId::from_name("c");
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        ws.set_focus(control).unwrap();
        let hit = add_field(&mut ws, task, "hit");

        mgr.register_handler(handler_with(
            "plain",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        mgr.dispatch(&mut ws, &mut site, RuntimeEvent::user(), false)
            .unwrap();
        assert_eq!(num(&ws, hit), 1.0);
    }

    #[test]
    fn test_event_without_any_target_is_dropped() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let hit = add_field(&mut ws, task, "hit");
        mgr.register_handler(handler_with(
            "plain",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        mgr.dispatch(&mut ws, &mut site, RuntimeEvent::user(), false)
            .unwrap();

        assert!(is_unset(&ws, hit));
    }

    #[test]
    fn test_abort_clears_queue_preserving_server_events() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let counter = FieldId::from_name("counter");
        ws.add_field(Field::new(counter, task, "counter").with_default(Value::Numeric(0.0)))
            .unwrap();

        mgr.register_handler(handler_with(
            "aborts",
            task,
            EventTrigger::new(EventKind::User),
            vec![Operation::new(OperationKind::Verify {
                mode: narthex_program::VerifyMode::Error,
                message: "abort".to_string(),
            })],
        ))
        .unwrap();
        mgr.register_handler(handler_with(
            "counts",
            task,
            EventTrigger::new(EventKind::Expression),
            vec![bump(counter)],
        ))
        .unwrap();

        let queue = mgr.queue();
        queue.enqueue(RuntimeEvent::user().with_target(EventTarget::Task(task)));
        queue.enqueue(
            RuntimeEvent::new(EventKind::Expression).with_target(EventTarget::Task(task)),
        );
        queue.enqueue(
            RuntimeEvent::new(EventKind::Expression)
                .with_target(EventTarget::Task(task))
                .from_server(),
        );

        mgr.run(&mut ws, &mut site).unwrap();

        // The plain expression event was swept; the server one survived
        assert_eq!(num(&ws, counter), 1.0);
        assert!(!mgr.is_stopped());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stopped_control_records_focus() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let control = ControlId::from_name("c");
        ws.add_control(Control::new(control, task, "c", 0)).unwrap();
        ws.set_focus(control).unwrap();
        mgr.register_handler(handler_with(
            "aborts",
            task,
            EventTrigger::new(EventKind::User),
            vec![Operation::new(OperationKind::Verify {
                mode: narthex_program::VerifyMode::Error,
                message: "abort".to_string(),
            })],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert!(mgr.is_stopped());
        assert_eq!(mgr.stopped_control(), Some(control));
    }

    #[test]
    fn test_record_prefix_end_condition_skips_handler_chain() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let hit = add_field(&mut ws, task, "hit");
        ws.task_mut(task).unwrap().end_condition = Some(Expr::always());

        mgr.register_handler(handler_with(
            "record_prefix",
            task,
            EventTrigger::new(EventKind::Internal).with_code(InternalCode::RecordPrefix),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::internal(InternalCode::RecordPrefix)
            .with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert!(is_unset(&ws, hit));
        let queued = mgr.queue().dequeue().unwrap();
        assert_eq!(queued.code, Some(InternalCode::Quit));
    }

    #[test]
    fn test_record_suffix_commits_record_state() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let field = add_field(&mut ws, task, "field");
        ws.set_field_value(field, Value::Numeric(1.0)).unwrap();
        assert!(ws.view(task).unwrap().is_record_modified());

        let event = RuntimeEvent::internal(InternalCode::RecordSuffix)
            .with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert!(!ws.view(task).unwrap().is_record_modified());
    }

    #[test]
    fn test_control_prefix_redirects_focus_to_parkable() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let label = ControlId::from_name("label");
        let input = ControlId::from_name("input");
        ws.add_control(Control::new(label, task, "label", 0).with_parkable(false))
            .unwrap();
        ws.add_control(Control::new(input, task, "input", 1)).unwrap();

        let event = RuntimeEvent::internal(InternalCode::ControlPrefix)
            .with_target(EventTarget::Control(label));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(ws.last_focused_control(), Some(input));
        assert!(!mgr.is_stopped());
    }

    #[test]
    fn test_control_prefix_without_parkable_control_exits_task() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let label = ControlId::from_name("label");
        ws.add_control(Control::new(label, task, "label", 0).with_parkable(false))
            .unwrap();

        let event = RuntimeEvent::internal(InternalCode::ControlPrefix)
            .with_target(EventTarget::Control(label));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert!(mgr.is_stopped());
        assert!(ws.task(task).unwrap().aborting);
        let queued = mgr.queue().dequeue().unwrap();
        assert_eq!(queued.code, Some(InternalCode::Quit));
    }

    #[test]
    fn test_focus_jump_queues_crossed_control_validation() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let a = ControlId::from_name("a");
        let b1 = ControlId::from_name("b1");
        let b2 = ControlId::from_name("b2");
        let c = ControlId::from_name("c");
        ws.add_control(Control::new(a, task, "a", 0)).unwrap();
        ws.add_control(Control::new(b1, task, "b1", 1)).unwrap();
        ws.add_control(Control::new(b2, task, "b2", 2)).unwrap();
        ws.add_control(Control::new(c, task, "c", 3)).unwrap();
        ws.set_focus(a).unwrap();

        let event = RuntimeEvent::internal(InternalCode::ControlPrefix)
            .with_target(EventTarget::Control(c));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(ws.last_focused_control(), Some(c));
        let queue = mgr.queue();
        let first = queue.dequeue().unwrap();
        let second = queue.dequeue().unwrap();
        assert_eq!(first.code, Some(InternalCode::ControlVerification));
        assert_eq!(first.target, EventTarget::Control(b1));
        assert_eq!(second.target, EventTarget::Control(b2));
    }

    #[test]
    fn test_focus_jump_validates_in_reverse_when_backward() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let a = ControlId::from_name("a");
        let b1 = ControlId::from_name("b1");
        let b2 = ControlId::from_name("b2");
        let c = ControlId::from_name("c");
        ws.add_control(Control::new(a, task, "a", 0)).unwrap();
        ws.add_control(Control::new(b1, task, "b1", 1)).unwrap();
        ws.add_control(Control::new(b2, task, "b2", 2)).unwrap();
        ws.add_control(Control::new(c, task, "c", 3)).unwrap();
        ws.set_focus(c).unwrap();
        ws.task_mut(task).unwrap().direction = narthex_core::FlowDirection::Backward;

        let event = RuntimeEvent::internal(InternalCode::ControlPrefix)
            .with_target(EventTarget::Control(a));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        let queue = mgr.queue();
        assert_eq!(
            queue.dequeue().unwrap().target,
            EventTarget::Control(b2)
        );
        assert_eq!(
            queue.dequeue().unwrap().target,
            EventTarget::Control(b1)
        );
    }

    #[test]
    fn test_incremental_locate_accumulates_without_handlers() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let hit = add_field(&mut ws, task, "hit");
        mgr.register_handler(handler_with(
            "locate",
            task,
            EventTrigger::new(EventKind::Internal).with_code(InternalCode::IncrementalLocate),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::internal(InternalCode::IncrementalLocate)
            .with_target(EventTarget::Task(task))
            .with_args(vec![EventArg::Value(Value::Alpha("ab".to_string()))]);
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        assert_eq!(ws.view(task).unwrap().locate_prefix(), "ab");
        assert!(is_unset(&ws, hit));
    }

    #[test]
    fn test_after_processing_queues_refresh() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        let refreshes = ws.drain_refresh_requests();
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0].task, task);
    }

    #[test]
    fn test_resume_deeper_enters_nested_handler_at_reported_position() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let outer_id = HandlerId::from_name("outer");
        let nested_id = HandlerId::from_name("nested");
        let after = add_field(&mut ws, task, "after");
        let fields: Vec<FieldId> = (1..=6)
            .map(|i| add_field(&mut ws, task, &format!("f{}", i)))
            .collect();

        // The server ran the call, entered the nested handler, executed
        // through id 4 there and stopped at id 5
        site.push_response(RemoteResponse::success(vec![
            ServerFrame::new(task, outer_id, 1),
            ServerFrame::new(task, nested_id, 5),
        ]));

        mgr.register_handler(handler_with(
            "outer",
            task,
            EventTrigger::new(EventKind::User),
            vec![
                Operation::new(OperationKind::Call {
                    handler: nested_id,
                    args: Vec::new(),
                })
                .with_server_id(1),
                set_num(after, 1.0).with_server_id(2),
            ],
        ))
        .unwrap();
        mgr.register_handler(handler_with(
            "nested",
            task,
            EventTrigger::new(EventKind::Expression),
            fields
                .iter()
                .enumerate()
                .map(|(i, &field)| set_num(field, 1.0).with_server_id(i as u32 + 1))
                .collect(),
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        // Operations before the resume point never re-execute
        for &field in &fields[..4] {
            assert!(is_unset(&ws, field));
        }
        // The reported position and everything after it ran locally
        assert_eq!(num(&ws, fields[4]), 1.0);
        assert_eq!(num(&ws, fields[5]), 1.0);
        // The outer handler continued past its call
        assert_eq!(num(&ws, after), 1.0);
        assert!(!mgr.has_server_stack());
        assert_eq!(mgr.stack().depth(), 0);
        assert!(!mgr.is_stopped());
    }

    #[test]
    fn test_server_began_handler_bypasses_enabled_check() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let handler_id = HandlerId::from_name("begun");
        let f1 = add_field(&mut ws, task, "f1");
        let f2 = add_field(&mut ws, task, "f2");

        mgr.register_handler(
            handler_with(
                "begun",
                task,
                EventTrigger::new(EventKind::User),
                vec![
                    set_num(f1, 1.0).with_server_id(1),
                    set_num(f2, 1.0).with_server_id(2),
                ],
            )
            .with_enabled(Expr::never()),
        )
        .unwrap();

        // The server began this handler and stopped at id 2
        mgr.set_server_stack(vec![ServerFrame::new(task, handler_id, 2)]);
        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, true).unwrap();

        assert!(is_unset(&ws, f1));
        assert_eq!(num(&ws, f2), 1.0);
        assert!(!mgr.has_server_stack());
    }

    #[test]
    fn test_mismatched_server_stack_exhausts_scope() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let marker = add_field(&mut ws, task, "marker");
        site.push_response(RemoteResponse::success(vec![ServerFrame::new(
            task,
            HandlerId::from_name("someone_else"),
            9,
        )]));

        mgr.register_handler(handler_with(
            "h",
            task,
            EventTrigger::new(EventKind::User),
            vec![
                Operation::new(OperationKind::ServerOperation {
                    descriptor: "commit".to_string(),
                })
                .with_server_id(1),
                set_num(marker, 1.0).with_server_id(2),
            ],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.dispatch(&mut ws, &mut site, event, false).unwrap();

        // The scope counted as executed, without aborting
        assert!(is_unset(&ws, marker));
        assert!(!mgr.is_stopped());
        // No stale resume state survives the chain
        assert!(!mgr.has_server_stack());
    }

    #[test]
    fn test_chain_depth_guard_stops_runaway_recursion() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let spec = RaiseEventSpec {
            kind: EventKind::User,
            code: None,
            target: EventTarget::Task(task),
            args: Vec::new(),
            wait: true,
        };
        mgr.register_handler(handler_with(
            "recursive",
            task,
            EventTrigger::new(EventKind::User),
            vec![Operation::new(OperationKind::RaiseEvent(spec))],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        let result = mgr.dispatch(&mut ws, &mut site, event, false);

        assert!(matches!(
            result,
            Err(EngineError::ChainDepthExceeded { .. })
        ));
        assert!(mgr.is_stopped());
        assert_eq!(mgr.stack().depth(), 0);
    }

    #[test]
    fn test_raise_immediate_dispatches_now() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let hit = add_field(&mut ws, task, "hit");
        mgr.register_handler(handler_with(
            "h",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user()
            .with_target(EventTarget::Task(task))
            .immediate();
        mgr.raise(&mut ws, &mut site, event).unwrap();

        assert_eq!(num(&ws, hit), 1.0);
        assert!(mgr.queue().is_empty());
    }

    #[test]
    fn test_raise_deferred_enqueues() {
        let (mut mgr, mut ws, mut site, task) = make_test_world();
        let hit = add_field(&mut ws, task, "hit");
        mgr.register_handler(handler_with(
            "h",
            task,
            EventTrigger::new(EventKind::User),
            vec![set_num(hit, 1.0)],
        ))
        .unwrap();

        let event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        mgr.raise(&mut ws, &mut site, event).unwrap();

        assert!(is_unset(&ws, hit));
        assert_eq!(mgr.queue().len(), 1);

        mgr.run(&mut ws, &mut site).unwrap();
        assert_eq!(num(&ws, hit), 1.0);
    }

    #[test]
    fn test_register_handler_rejects_duplicate_id() {
        let (mut mgr, _ws, _site, task) = make_test_world();
        let trigger = EventTrigger::new(EventKind::User);
        mgr.register_handler(handler_with("h", task, trigger, Vec::new()))
            .unwrap();
        let result = mgr.register_handler(handler_with("h", task, trigger, Vec::new()));
        assert!(result.is_err());
    }
}
