//! Field entities.

use narthex_core::{FieldId, TaskId, Value};
use serde::{Deserialize, Serialize};

/// One field in a task's data view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field id
    pub id: FieldId,
    /// Owning task
    pub task: TaskId,
    /// Display name
    pub name: String,
    /// Declared default, applied when a parameter is not supplied
    pub default_value: Value,
    /// Whether the field belongs to a linked record
    ///
    /// Incremental updates of linked fields are never performed
    /// locally.
    pub linked: bool,
}

impl Field {
    /// Create an unlinked field defaulting to `Null`
    #[must_use]
    pub fn new(id: FieldId, task: TaskId, name: &str) -> Self {
        Self {
            id,
            task,
            name: name.to_string(),
            default_value: Value::Null,
            linked: false,
        }
    }

    /// Set the declared default
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    /// Mark the field as linked
    #[must_use]
    pub fn with_linked(mut self, linked: bool) -> Self {
        self.linked = linked;
        self
    }
}
