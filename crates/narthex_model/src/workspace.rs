//! The workspace - owning collections for all entities.
//!
//! Tasks, controls and fields are resolved through the workspace by
//! id; the workspace also owns the per-task data views, the focus
//! bookkeeping the dispatcher consults, and the display-refresh
//! requests default processing emits for the host to drain.

use crate::control::Control;
use crate::dataview::DataView;
use crate::field::Field;
use crate::task::Task;
use indexmap::IndexMap;
use narthex_core::{ControlId, CoreError, CoreResult, FieldId, TaskId, Value};
use narthex_program::FieldReader;
use serde::{Deserialize, Serialize};

/// A display-refresh request emitted by default processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Task whose form should repaint
    pub task: TaskId,
}

/// Owning collections for tasks, controls, fields and data views
#[derive(Debug, Default)]
pub struct Workspace {
    tasks: IndexMap<TaskId, Task>,
    controls: IndexMap<ControlId, Control>,
    fields: IndexMap<FieldId, Field>,
    views: IndexMap<TaskId, DataView>,
    last_focused: Option<ControlId>,
    refresh_requests: Vec<RefreshRequest>,
}

impl Workspace {
    /// Create an empty workspace
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and create its data view
    ///
    /// # Errors
    ///
    /// Returns error if the id is already registered
    pub fn add_task(&mut self, task: Task) -> CoreResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(CoreError::already_exists("Task", task.id));
        }
        self.views.insert(task.id, DataView::new());
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// Register a control
    ///
    /// # Errors
    ///
    /// Returns error if the id is already registered or the owning
    /// task is unknown
    pub fn add_control(&mut self, control: Control) -> CoreResult<()> {
        if self.controls.contains_key(&control.id) {
            return Err(CoreError::already_exists("Control", control.id));
        }
        if !self.tasks.contains_key(&control.task) {
            return Err(CoreError::not_found("Task", control.task));
        }
        self.controls.insert(control.id, control);
        Ok(())
    }

    /// Register a field
    ///
    /// # Errors
    ///
    /// Returns error if the id is already registered or the owning
    /// task is unknown
    pub fn add_field(&mut self, field: Field) -> CoreResult<()> {
        if self.fields.contains_key(&field.id) {
            return Err(CoreError::already_exists("Field", field.id));
        }
        if !self.tasks.contains_key(&field.task) {
            return Err(CoreError::not_found("Task", field.task));
        }
        self.fields.insert(field.id, field);
        Ok(())
    }

    /// Look up a task
    ///
    /// # Errors
    ///
    /// Returns error if the id is unknown
    pub fn task(&self, id: TaskId) -> CoreResult<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| CoreError::not_found("Task", id))
    }

    /// Look up a task mutably
    ///
    /// # Errors
    ///
    /// Returns error if the id is unknown
    pub fn task_mut(&mut self, id: TaskId) -> CoreResult<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Task", id))
    }

    /// Look up a control
    ///
    /// # Errors
    ///
    /// Returns error if the id is unknown
    pub fn control(&self, id: ControlId) -> CoreResult<&Control> {
        self.controls
            .get(&id)
            .ok_or_else(|| CoreError::not_found("Control", id))
    }

    /// Look up a field
    ///
    /// # Errors
    ///
    /// Returns error if the id is unknown
    pub fn field(&self, id: FieldId) -> CoreResult<&Field> {
        self.fields
            .get(&id)
            .ok_or_else(|| CoreError::not_found("Field", id))
    }

    /// Data view of a task
    ///
    /// # Errors
    ///
    /// Returns error if the task is unknown
    pub fn view(&self, task: TaskId) -> CoreResult<&DataView> {
        self.views
            .get(&task)
            .ok_or_else(|| CoreError::not_found("Task", task))
    }

    /// Data view of a task, mutably
    ///
    /// # Errors
    ///
    /// Returns error if the task is unknown
    pub fn view_mut(&mut self, task: TaskId) -> CoreResult<&mut DataView> {
        self.views
            .get_mut(&task)
            .ok_or_else(|| CoreError::not_found("Task", task))
    }

    /// All registered task ids, in registration order
    #[must_use]
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    /// Whether `ancestor` is `task` or one of its ancestors
    #[must_use]
    pub fn is_ancestor(&self, ancestor: TaskId, task: TaskId) -> bool {
        let mut at = Some(task);
        while let Some(current) = at {
            if current == ancestor {
                return true;
            }
            at = self.tasks.get(&current).and_then(|t| t.parent);
        }
        false
    }

    /// Current value of a field: the view's cell, falling back to the
    /// declared default
    #[must_use]
    pub fn field_value(&self, field: FieldId) -> Option<Value> {
        let meta = self.fields.get(&field)?;
        let view = self.views.get(&meta.task)?;
        Some(
            view.get(field)
                .cloned()
                .unwrap_or_else(|| meta.default_value.clone()),
        )
    }

    /// Write a field value, marking it modified
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown
    pub fn set_field_value(&mut self, field: FieldId, value: Value) -> CoreResult<()> {
        let task = self.field(field)?.task;
        self.view_mut(task)?.set(field, value);
        Ok(())
    }

    /// Write a field value without touching the modified set
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown
    pub fn set_field_unmodified(&mut self, field: FieldId, value: Value) -> CoreResult<()> {
        let task = self.field(field)?.task;
        self.view_mut(task)?.set_unmodified(field, value);
        Ok(())
    }

    /// Reset a field to its declared default
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown
    pub fn reset_field(&mut self, field: FieldId) -> CoreResult<()> {
        let (task, default) = {
            let meta = self.field(field)?;
            (meta.task, meta.default_value.clone())
        };
        self.view_mut(task)?.set_unmodified(field, default);
        Ok(())
    }

    /// The control focus last parked on
    #[must_use]
    pub const fn last_focused_control(&self) -> Option<ControlId> {
        self.last_focused
    }

    /// The task owning the last-focused control
    #[must_use]
    pub fn last_focused_task(&self) -> Option<TaskId> {
        self.last_focused
            .and_then(|c| self.controls.get(&c))
            .map(|c| c.task)
    }

    /// Park focus on a control; refused for unparkable controls
    ///
    /// # Errors
    ///
    /// Returns error if the control is unknown
    pub fn set_focus(&mut self, control: ControlId) -> CoreResult<bool> {
        let parkable = self.control(control)?.parkable;
        if parkable {
            self.last_focused = Some(control);
        }
        Ok(parkable)
    }

    /// Drop focus entirely
    pub fn clear_focus(&mut self) {
        self.last_focused = None;
    }

    /// Next parkable control of the same task, by tab order, after the
    /// given control; wraps to the first
    #[must_use]
    pub fn next_parkable(&self, after: ControlId) -> Option<ControlId> {
        let anchor = self.controls.get(&after)?;
        let mut candidates: Vec<&Control> = self
            .controls
            .values()
            .filter(|c| c.task == anchor.task && c.parkable)
            .collect();
        candidates.sort_by_key(|c| c.tab_order);

        candidates
            .iter()
            .find(|c| c.tab_order > anchor.tab_order)
            .or_else(|| candidates.first())
            .map(|c| c.id)
    }

    /// First parkable control of a task, by tab order
    #[must_use]
    pub fn first_parkable(&self, task: TaskId) -> Option<ControlId> {
        self.controls
            .values()
            .filter(|c| c.task == task && c.parkable)
            .min_by_key(|c| c.tab_order)
            .map(|c| c.id)
    }

    /// Parkable, modifiable controls of the same task lying strictly
    /// between two controls in tab order, lowest first
    ///
    /// These are the controls a focus jump passes over; each one gets
    /// validated on the way.
    #[must_use]
    pub fn controls_between(&self, from: ControlId, to: ControlId) -> Vec<ControlId> {
        let (Some(from), Some(to)) = (self.controls.get(&from), self.controls.get(&to)) else {
            return Vec::new();
        };
        if from.task != to.task {
            return Vec::new();
        }
        let low = from.tab_order.min(to.tab_order);
        let high = from.tab_order.max(to.tab_order);

        let mut between: Vec<&Control> = self
            .controls
            .values()
            .filter(|c| {
                c.task == from.task
                    && c.parkable
                    && c.modifiable
                    && c.tab_order > low
                    && c.tab_order < high
            })
            .collect();
        between.sort_by_key(|c| c.tab_order);
        between.iter().map(|c| c.id).collect()
    }

    /// Queue a display-refresh request
    pub fn request_refresh(&mut self, task: TaskId) {
        self.refresh_requests.push(RefreshRequest { task });
    }

    /// Take all pending display-refresh requests
    pub fn drain_refresh_requests(&mut self) -> Vec<RefreshRequest> {
        std::mem::take(&mut self.refresh_requests)
    }
}

impl FieldReader for Workspace {
    fn read(&self, field: FieldId) -> Option<Value> {
        self.field_value(field)
    }
}
