//! Control entities.

use narthex_core::{ControlId, TaskId};
use serde::{Deserialize, Serialize};

/// One widget on a task's form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Control id
    pub id: ControlId,
    /// Owning task
    pub task: TaskId,
    /// Display name
    pub name: String,
    /// Whether focus can park on the control
    pub parkable: bool,
    /// Whether the control accepts input
    pub modifiable: bool,
    /// Position in the form's tab order
    pub tab_order: u32,
}

impl Control {
    /// Create a parkable, modifiable control
    #[must_use]
    pub fn new(id: ControlId, task: TaskId, name: &str, tab_order: u32) -> Self {
        Self {
            id,
            task,
            name: name.to_string(),
            parkable: true,
            modifiable: true,
            tab_order,
        }
    }

    /// Set parkability
    #[must_use]
    pub fn with_parkable(mut self, parkable: bool) -> Self {
        self.parkable = parkable;
        self
    }

    /// Set modifiability
    #[must_use]
    pub fn with_modifiable(mut self, modifiable: bool) -> Self {
        self.modifiable = modifiable;
        self
    }
}
