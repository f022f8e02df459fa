//! Event handlers.
//!
//! A handler is a trigger plus one operation table. The trigger
//! decides which tier the handler matches in (specific, non-specific,
//! global-specific); execution binds call arguments to declared local
//! fields, interprets the table, and copies results back into the
//! caller's argument fields.

use crate::dispatch::EventsManager;
use crate::error::EngineResult;
use crate::event::{EventArg, RuntimeEvent};
use crate::interp;
use narthex_core::{BreakLevel, ControlId, EventKind, EventTarget, FieldId, HandlerId, InternalCode, TaskId};
use narthex_model::Workspace;
use narthex_program::{Expr, OperationTable};
use narthex_remote::RemoteSite;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reach of a handler's trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerScope {
    /// Events of the owning task only
    Task,
    /// Events of the owning task and its descendants
    Subtree,
    /// Events of any task
    Global,
}

/// What a handler fires on
///
/// At most one of bound control, bound field and form level is set;
/// none set makes the handler non-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Event kind the trigger fires on
    pub kind: EventKind,
    /// Internal code the trigger fires on; `None` matches any
    pub code: Option<InternalCode>,
    /// Reach of the trigger
    pub scope: HandlerScope,
    /// Control the handler is bound to
    bound_control: Option<ControlId>,
    /// Field the handler is bound to
    bound_field: Option<FieldId>,
    /// Whether the handler is bound to the form itself
    form_level: bool,
}

impl EventTrigger {
    /// Create a non-specific, task-scoped trigger
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            code: None,
            scope: HandlerScope::Task,
            bound_control: None,
            bound_field: None,
            form_level: false,
        }
    }

    /// Set the internal code
    #[must_use]
    pub fn with_code(mut self, code: InternalCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Set the scope
    #[must_use]
    pub fn with_scope(mut self, scope: HandlerScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bind to a control, clearing any other binding
    #[must_use]
    pub fn bound_to_control(mut self, control: ControlId) -> Self {
        self.bound_control = Some(control);
        self.bound_field = None;
        self.form_level = false;
        self
    }

    /// Bind to a field, clearing any other binding
    #[must_use]
    pub fn bound_to_field(mut self, field: FieldId) -> Self {
        self.bound_field = Some(field);
        self.bound_control = None;
        self.form_level = false;
        self
    }

    /// Bind to the form itself, clearing any other binding
    #[must_use]
    pub fn form_level(mut self) -> Self {
        self.form_level = true;
        self.bound_control = None;
        self.bound_field = None;
        self
    }

    /// Whether any binding is set
    #[must_use]
    pub const fn is_specific(&self) -> bool {
        self.bound_control.is_some() || self.bound_field.is_some() || self.form_level
    }

    /// The bound control, if any
    #[must_use]
    pub const fn control(&self) -> Option<ControlId> {
        self.bound_control
    }

    /// The bound field, if any
    #[must_use]
    pub const fn field(&self) -> Option<FieldId> {
        self.bound_field
    }

    /// Whether the trigger's kind and code match the event
    #[must_use]
    pub fn matches_base(&self, event: &RuntimeEvent) -> bool {
        self.kind == event.kind && (self.code.is_none() || self.code == event.code)
    }

    /// Whether the binding matches the entity that raised the event
    #[must_use]
    pub fn bound_target_matches(&self, event: &RuntimeEvent, handler_task: TaskId) -> bool {
        if let Some(control) = self.bound_control {
            return event.target == EventTarget::Control(control);
        }
        if let Some(field) = self.bound_field {
            return event.target == EventTarget::Field(field);
        }
        if self.form_level {
            return event.target == EventTarget::Task(handler_task);
        }
        false
    }
}

/// What a handler reports back to the dispatch chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Whether lower handlers in the chain may fire
    pub propagate: bool,
    /// Operation index the caller should treat as the continuation
    /// point, set when interpretation stopped at a server-resume
    /// boundary inside the table
    pub resume: Option<usize>,
}

impl HandlerOutcome {
    /// The handler did not fire; the chain continues
    #[must_use]
    pub const fn continue_chain() -> Self {
        Self {
            propagate: true,
            resume: None,
        }
    }
}

/// A trigger plus one operation table
#[derive(Debug, Clone)]
pub struct EventHandler {
    /// Handler id
    pub id: HandlerId,
    /// Owning task
    pub task: TaskId,
    /// Trigger
    pub trigger: EventTrigger,
    /// Enabled expression, checked before firing
    pub enabled: Expr,
    /// Propagate expression, checked after firing
    pub propagate: Expr,
    /// Declared local fields bound positionally to call arguments
    pub params: Vec<FieldId>,
    /// The handler's program
    pub table: Arc<OperationTable>,
}

impl EventHandler {
    /// Create a handler that is always enabled and always propagates
    #[must_use]
    pub fn new(id: HandlerId, task: TaskId, trigger: EventTrigger, table: OperationTable) -> Self {
        Self {
            id,
            task,
            trigger,
            enabled: Expr::always(),
            propagate: Expr::always(),
            params: Vec::new(),
            table: Arc::new(table),
        }
    }

    /// Set the enabled expression
    #[must_use]
    pub fn with_enabled(mut self, enabled: Expr) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the propagate expression
    #[must_use]
    pub fn with_propagate(mut self, propagate: Expr) -> Self {
        self.propagate = propagate;
        self
    }

    /// Declare the positional parameter fields
    #[must_use]
    pub fn with_params(mut self, params: Vec<FieldId>) -> Self {
        self.params = params;
        self
    }

    /// Run the handler against an event
    ///
    /// Skips without firing when disabled, unless the server already
    /// began running this handler or the enabled check was hoisted by
    /// the caller. The task's break level is saved and restored on
    /// every exit path.
    ///
    /// # Errors
    ///
    /// Returns error on remote faults and structural defects; the
    /// break level is restored regardless
    pub fn execute(
        &self,
        mgr: &mut EventsManager,
        ws: &mut Workspace,
        remote: &mut dyn RemoteSite,
        event: &RuntimeEvent,
        resumed_from_server: bool,
        enabled_already_checked: bool,
    ) -> EngineResult<HandlerOutcome> {
        if !enabled_already_checked && !resumed_from_server && !self.enabled.truthy(ws) {
            return Ok(HandlerOutcome::continue_chain());
        }

        let saved_break = ws.task(self.task)?.break_level;
        ws.task_mut(self.task)?.break_level = BreakLevel::Handler;

        let result = self.execute_inner(mgr, ws, remote, event, resumed_from_server);

        if let Ok(task) = ws.task_mut(self.task) {
            task.break_level = saved_break;
        }
        result
    }

    fn execute_inner(
        &self,
        mgr: &mut EventsManager,
        ws: &mut Workspace,
        remote: &mut dyn RemoteSite,
        event: &RuntimeEvent,
        resumed_from_server: bool,
    ) -> EngineResult<HandlerOutcome> {
        // A resumed handler keeps the state the server left behind;
        // argument sync is the transport's concern
        if !resumed_from_server {
            self.bind_arguments(ws, event)?;
        }

        let run = interp::run_operations(
            mgr,
            ws,
            remote,
            self,
            event,
            resumed_from_server,
            0,
            self.table.len(),
        )?;

        if !resumed_from_server {
            self.copy_back(ws, event)?;
        }

        let propagate = !run.aborted && self.propagate.truthy(ws);
        Ok(HandlerOutcome {
            propagate,
            resume: run.resume_hint,
        })
    }

    /// Bind call arguments to the declared local fields positionally:
    /// skip entries leave the current value, missing entries reset the
    /// parameter to its declared default
    fn bind_arguments(&self, ws: &mut Workspace, event: &RuntimeEvent) -> EngineResult<()> {
        for (index, &param) in self.params.iter().enumerate() {
            match event.args.get(index) {
                Some(EventArg::Skip) => {}
                Some(arg) => {
                    if let Some(value) = arg.resolve(ws) {
                        ws.set_field_unmodified(param, value)?;
                    }
                }
                None => ws.reset_field(param)?,
            }
        }
        Ok(())
    }

    /// Copy parameter results back into the caller's argument fields,
    /// unless the task is aborting
    fn copy_back(&self, ws: &mut Workspace, event: &RuntimeEvent) -> EngineResult<()> {
        if ws.task(self.task)?.aborting {
            return Ok(());
        }
        for (index, &param) in self.params.iter().enumerate() {
            if let Some(EventArg::Ref(caller_field)) = event.args.get(index) {
                if *caller_field == param {
                    continue;
                }
                if let Some(value) = ws.field_value(param) {
                    ws.set_field_value(*caller_field, value)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_trigger() -> EventTrigger {
        EventTrigger::new(EventKind::User)
    }

    #[test]
    fn test_trigger_binding_is_exclusive() {
        let control = ControlId::from_name("c");
        let field = FieldId::from_name("f");

        let trigger = make_test_trigger()
            .bound_to_control(control)
            .bound_to_field(field);
        assert_eq!(trigger.control(), None);
        assert_eq!(trigger.field(), Some(field));

        let trigger = make_test_trigger().bound_to_field(field).form_level();
        assert_eq!(trigger.field(), None);
        assert!(trigger.is_specific());

        let trigger = make_test_trigger().form_level().bound_to_control(control);
        assert_eq!(trigger.control(), Some(control));
    }

    #[test]
    fn test_trigger_non_specific_by_default() {
        assert!(!make_test_trigger().is_specific());
    }

    #[test]
    fn test_trigger_matches_base() {
        let trigger = EventTrigger::new(EventKind::Internal).with_code(InternalCode::RecordPrefix);

        assert!(trigger.matches_base(&RuntimeEvent::internal(InternalCode::RecordPrefix)));
        assert!(!trigger.matches_base(&RuntimeEvent::internal(InternalCode::RecordSuffix)));
        assert!(!trigger.matches_base(&RuntimeEvent::user()));

        // No code constraint matches any internal code
        let open = EventTrigger::new(EventKind::Internal);
        assert!(open.matches_base(&RuntimeEvent::internal(InternalCode::RecordSuffix)));
    }

    #[test]
    fn test_trigger_bound_target_matches() {
        let task = TaskId::from_name("t");
        let control = ControlId::from_name("c");

        let trigger = make_test_trigger().bound_to_control(control);
        let hit = RuntimeEvent::user().with_target(EventTarget::Control(control));
        let miss = RuntimeEvent::user().with_target(EventTarget::Control(ControlId::new()));
        assert!(trigger.bound_target_matches(&hit, task));
        assert!(!trigger.bound_target_matches(&miss, task));

        let form = make_test_trigger().form_level();
        let task_event = RuntimeEvent::user().with_target(EventTarget::Task(task));
        assert!(form.bound_target_matches(&task_event, task));
        assert!(!form.bound_target_matches(&hit, task));

        // Non-specific triggers never target-match
        assert!(!make_test_trigger().bound_target_matches(&task_event, task));
    }

    #[test]
    fn test_handler_builders() {
        let handler = EventHandler::new(
            HandlerId::from_name("h"),
            TaskId::from_name("t"),
            make_test_trigger(),
            OperationTable::empty(),
        )
        .with_enabled(Expr::never())
        .with_params(vec![FieldId::from_name("p")]);

        assert_eq!(handler.enabled, Expr::never());
        assert_eq!(handler.params.len(), 1);
        assert!(handler.table.is_empty());
    }

    #[test]
    fn test_handler_outcome_continue_chain() {
        let outcome = HandlerOutcome::continue_chain();
        assert!(outcome.propagate);
        assert!(outcome.resume.is_none());
    }
}
