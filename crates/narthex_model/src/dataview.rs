//! Per-task data views.
//!
//! A data view holds the current record's field values, the modified
//! set, the record mode, and the record cursor. The backing record
//! source is out of scope; the cursor tracks position and bounds only.

use indexmap::{IndexMap, IndexSet};
use narthex_core::{FieldId, Value};
use serde::{Deserialize, Serialize};

/// Mode of the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordMode {
    /// Read-only
    View,
    /// Editing an existing record
    Modify,
    /// Editing a new record
    Create,
    /// Marked for deletion
    Delete,
}

impl Default for RecordMode {
    fn default() -> Self {
        Self::View
    }
}

/// One task's data view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataView {
    /// Field values of the current record
    values: IndexMap<FieldId, Value>,
    /// Fields modified since the last commit
    modified: IndexSet<FieldId>,
    /// Record mode
    pub mode: RecordMode,
    /// Record cursor position
    record_index: usize,
    /// Number of records reachable by the cursor
    record_count: usize,
    /// Pending incremental-locate prefix
    locate_prefix: String,
}

impl DataView {
    /// Create an empty view positioned on a single record
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: IndexMap::new(),
            modified: IndexSet::new(),
            mode: RecordMode::View,
            record_index: 0,
            record_count: 1,
            locate_prefix: String::new(),
        }
    }

    /// Set the number of reachable records
    #[must_use]
    pub fn with_record_count(mut self, count: usize) -> Self {
        self.record_count = count.max(1);
        self
    }

    /// Current value of a field
    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&Value> {
        self.values.get(&field)
    }

    /// Set a field value and mark it modified
    pub fn set(&mut self, field: FieldId, value: Value) {
        self.values.insert(field, value);
        self.modified.insert(field);
        if self.mode == RecordMode::View {
            self.mode = RecordMode::Modify;
        }
    }

    /// Set a field value without touching the modified set
    ///
    /// Used when binding parameters and applying declared defaults.
    pub fn set_unmodified(&mut self, field: FieldId, value: Value) {
        self.values.insert(field, value);
    }

    /// Whether a field was modified since the last commit
    #[must_use]
    pub fn is_modified(&self, field: FieldId) -> bool {
        self.modified.contains(&field)
    }

    /// Whether any field was modified since the last commit
    #[must_use]
    pub fn is_record_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    /// Mark a field modified without changing its value
    pub fn mark_modified(&mut self, field: FieldId) {
        self.modified.insert(field);
        if self.mode == RecordMode::View {
            self.mode = RecordMode::Modify;
        }
    }

    /// Commit the record: clear the modified set, return to view mode
    pub fn commit(&mut self) {
        self.modified.clear();
        self.mode = RecordMode::View;
    }

    /// Record cursor position
    #[must_use]
    pub const fn record_index(&self) -> usize {
        self.record_index
    }

    /// Move the cursor forward; returns whether it moved
    pub fn move_next(&mut self) -> bool {
        if self.record_index + 1 < self.record_count {
            self.record_index += 1;
            self.modified.clear();
            self.mode = RecordMode::View;
            true
        } else {
            false
        }
    }

    /// Move the cursor backward; returns whether it moved
    pub fn move_previous(&mut self) -> bool {
        if self.record_index > 0 {
            self.record_index -= 1;
            self.modified.clear();
            self.mode = RecordMode::View;
            true
        } else {
            false
        }
    }

    /// Append a keystroke to the incremental-locate prefix
    pub fn push_locate(&mut self, fragment: &str) {
        self.locate_prefix.push_str(fragment);
    }

    /// Take and clear the incremental-locate prefix
    pub fn take_locate(&mut self) -> String {
        std::mem::take(&mut self.locate_prefix)
    }

    /// The pending incremental-locate prefix
    #[must_use]
    pub fn locate_prefix(&self) -> &str {
        &self.locate_prefix
    }
}

impl Default for DataView {
    fn default() -> Self {
        Self::new()
    }
}
