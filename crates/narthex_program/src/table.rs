//! The operation table - one handler's ordered, immutable program.
//!
//! Construction validates the block structure (see `validate`); a
//! table that exists is structurally sound. Lookup by server sequence
//! id uses the later-or-equal rule: blank operations are never
//! transmitted by the server, so a reported position may fall between
//! two local ids.

use crate::operation::{Operation, OperationKind, SERVER_ID_BLANK};
use crate::validate::{self, TableError};
use indexmap::IndexMap;

/// Ordered, immutable sequence of operations for one handler
///
/// Tables are built from materialized operations, never decoded
/// directly; construction is the only way to get one, so the server-id
/// index is always consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationTable {
    ops: Vec<Operation>,
    /// Transmitted server id -> local index
    by_server_id: IndexMap<u32, usize>,
}

impl OperationTable {
    /// Build a table from materialized operations
    ///
    /// # Errors
    ///
    /// Returns error if the block structure is invalid
    pub fn new(ops: Vec<Operation>) -> Result<Self, TableError> {
        validate::validate(&ops)?;

        let mut by_server_id = IndexMap::new();
        for (index, op) in ops.iter().enumerate() {
            if op.server_id != SERVER_ID_BLANK {
                by_server_id.insert(op.server_id, index);
            }
        }

        Ok(Self { ops, by_server_id })
    }

    /// The empty program
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ops: Vec::new(),
            by_server_id: IndexMap::new(),
        }
    }

    /// Number of operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the table has no operations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operation at an index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.ops.get(index)
    }

    /// All operations in order
    #[must_use]
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Iterate operations in order
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    /// Local index of an exact server sequence id
    #[must_use]
    pub fn index_of_server_id(&self, server_id: u32) -> Option<usize> {
        self.by_server_id.get(&server_id).copied()
    }

    /// First local index whose server id is later than or equal to the
    /// target
    ///
    /// This is the resume lookup: the server never transmits blank
    /// operations, so its reported position may name an id the local
    /// table does not carry exactly.
    #[must_use]
    pub fn index_at_or_after(&self, server_id: u32) -> Option<usize> {
        self.ops
            .iter()
            .position(|op| op.server_id != SERVER_ID_BLANK && op.server_id >= server_id)
    }

    /// The unique block opener whose end is the given end-block
    #[must_use]
    pub fn matching_block_start(&self, end_index: usize) -> Option<usize> {
        self.ops.iter().position(|op| {
            matches!(
                op.kind,
                OperationKind::BlockIf { .. } | OperationKind::BlockLoop { .. }
            ) && op.block_end() == Some(end_index)
        })
    }

    /// Block headers to enter, outermost first, when resuming directly
    /// at `target` without interpreting the operations before it
    ///
    /// Walks the structure from the top: a whole block lying before
    /// the target is skipped over its end; a block containing the
    /// target contributes the branch header whose body holds the
    /// target, tolerating else chains and nested loops.
    #[must_use]
    pub fn resume_path(&self, target: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut pc = 0;

        while pc < target && pc < self.ops.len() {
            let op = &self.ops[pc];
            let Some(end) = op.block_end().filter(|_| op.is_block_open()) else {
                pc += 1;
                continue;
            };

            if target > end {
                // Whole construct lies before the target
                pc = end;
                continue;
            }
            if target == end {
                // Target is the end-block itself; nothing to enter
                break;
            }

            if matches!(op.kind, OperationKind::BlockLoop { .. }) {
                path.push(pc);
                pc += 1;
                continue;
            }

            // If/else chain: select the branch whose body holds the target
            let mut branch = pc;
            loop {
                let close = self.ops[branch].block_close().unwrap_or(end);
                if target < close {
                    path.push(branch);
                    pc = branch + 1;
                    break;
                }
                if close >= end || target == close {
                    // Target is a later branch header or the end-block
                    pc = target;
                    break;
                }
                branch = close;
            }
        }

        path
    }
}

impl<'a> IntoIterator for &'a OperationTable {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
