//! Structural validation of operation tables.
//!
//! Block pointers must point strictly forward, branch chains must
//! terminate at their own end-block, every end-block pairs with
//! exactly one opener, and blocks must nest properly. A table that
//! fails here indicates an upstream construction defect, not a
//! runtime condition.

use crate::operation::{Operation, OperationKind, SERVER_ID_BLANK};

/// Table construction error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A block pointer does not point strictly forward
    #[error("operation {index}: block pointer {target} does not point forward")]
    PointerNotForward {
        /// Offending operation
        index: usize,
        /// Pointer value
        target: usize,
    },

    /// A block pointer is out of range
    #[error("operation {index}: block pointer {target} is out of range")]
    PointerOutOfRange {
        /// Offending operation
        index: usize,
        /// Pointer value
        target: usize,
    },

    /// A close pointer names neither a branch nor the end-block
    #[error("operation {index}: close target {target} is not a branch or end-block")]
    BadCloseTarget {
        /// Offending operation
        index: usize,
        /// Pointer value
        target: usize,
    },

    /// An end pointer names an operation that is not an end-block
    #[error("operation {index}: end target {target} is not an end-block")]
    BadEndTarget {
        /// Offending operation
        index: usize,
        /// Pointer value
        target: usize,
    },

    /// A branch of a chain disagrees with the chain's end-block
    #[error("operation {index}: branch end {found} disagrees with chain end {expected}")]
    BranchEndMismatch {
        /// Offending branch
        index: usize,
        /// End carried by the branch
        found: usize,
        /// End carried by the chain opener
        expected: usize,
    },

    /// An end-block is matched by zero or several openers
    #[error("end-block {index} is matched by {count} openers, expected exactly one")]
    EndBlockPairing {
        /// Offending end-block
        index: usize,
        /// Matching opener count
        count: usize,
    },

    /// A branch is not reachable from any chain
    #[error("branch {index} is not the close target of any block")]
    OrphanBranch {
        /// Offending branch
        index: usize,
    },

    /// Blocks overlap without nesting
    #[error("operation {index} is misnested")]
    Misnested {
        /// Offending operation
        index: usize,
    },

    /// A block is never terminated
    #[error("block opened at {index} is never terminated")]
    Unterminated {
        /// Offending opener
        index: usize,
    },

    /// Transmitted server ids must strictly increase
    #[error("operation {index}: server id {found} does not increase")]
    NonMonotonicServerId {
        /// Offending operation
        index: usize,
        /// Id carried by the operation
        found: u32,
    },
}

/// Validate the block structure of an operation sequence
///
/// # Errors
///
/// Returns the first violation found
pub fn validate(ops: &[Operation]) -> Result<(), TableError> {
    check_pointers(ops)?;
    check_end_pairing(ops)?;
    check_orphan_branches(ops)?;
    check_nesting(ops)?;
    check_server_ids(ops)?;
    Ok(())
}

fn check_pointers(ops: &[Operation]) -> Result<(), TableError> {
    for (index, op) in ops.iter().enumerate() {
        let (close, end) = match op.kind {
            OperationKind::BlockIf {
                block_close,
                block_end,
            }
            | OperationKind::BlockElse {
                block_close,
                block_end,
            } => (block_close, block_end),
            OperationKind::BlockLoop { block_end } => (block_end, block_end),
            _ => continue,
        };

        for target in [close, end] {
            if target <= index {
                return Err(TableError::PointerNotForward { index, target });
            }
            if target >= ops.len() {
                return Err(TableError::PointerOutOfRange { index, target });
            }
        }
        if close > end {
            return Err(TableError::Misnested { index });
        }
        if !ops[end].is_end_block() {
            return Err(TableError::BadEndTarget { index, target: end });
        }
        let close_ok = matches!(ops[close].kind, OperationKind::BlockElse { .. })
            || ops[close].is_end_block();
        if !close_ok {
            return Err(TableError::BadCloseTarget {
                index,
                target: close,
            });
        }
        if ops[close].is_end_block() && close != end {
            return Err(TableError::BadCloseTarget {
                index,
                target: close,
            });
        }
        if let OperationKind::BlockElse { block_end, .. } = ops[close].kind {
            if block_end != end {
                return Err(TableError::BranchEndMismatch {
                    index: close,
                    found: block_end,
                    expected: end,
                });
            }
        }
    }
    Ok(())
}

fn check_end_pairing(ops: &[Operation]) -> Result<(), TableError> {
    for (index, op) in ops.iter().enumerate() {
        if !op.is_end_block() {
            continue;
        }
        let count = ops
            .iter()
            .filter(|candidate| {
                matches!(
                    candidate.kind,
                    OperationKind::BlockIf { .. } | OperationKind::BlockLoop { .. }
                ) && candidate.block_end() == Some(index)
            })
            .count();
        if count != 1 {
            return Err(TableError::EndBlockPairing { index, count });
        }
    }
    Ok(())
}

fn check_orphan_branches(ops: &[Operation]) -> Result<(), TableError> {
    for (index, op) in ops.iter().enumerate() {
        if !matches!(op.kind, OperationKind::BlockElse { .. }) {
            continue;
        }
        let referenced = ops.iter().any(|candidate| {
            matches!(
                candidate.kind,
                OperationKind::BlockIf { .. } | OperationKind::BlockElse { .. }
            ) && candidate.block_close() == Some(index)
        });
        if !referenced {
            return Err(TableError::OrphanBranch { index });
        }
    }
    Ok(())
}

/// Stack scan: every opener's end must close in last-in-first-out order
fn check_nesting(ops: &[Operation]) -> Result<(), TableError> {
    let mut open_ends: Vec<usize> = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        if op.is_end_block() {
            match open_ends.pop() {
                Some(expected) if expected == index => {}
                _ => return Err(TableError::Misnested { index }),
            }
            continue;
        }
        let is_opener = matches!(
            op.kind,
            OperationKind::BlockIf { .. } | OperationKind::BlockLoop { .. }
        );
        if is_opener {
            let end = op.block_end().unwrap_or(index);
            if let Some(&outer) = open_ends.last() {
                if end >= outer {
                    return Err(TableError::Misnested { index });
                }
            }
            open_ends.push(end);
        }
    }

    match open_ends.last() {
        Some(&end) => {
            let index = ops
                .iter()
                .position(|op| op.block_end() == Some(end))
                .unwrap_or(0);
            Err(TableError::Unterminated { index })
        }
        None => Ok(()),
    }
}

fn check_server_ids(ops: &[Operation]) -> Result<(), TableError> {
    let mut last = SERVER_ID_BLANK;
    for (index, op) in ops.iter().enumerate() {
        if op.server_id == SERVER_ID_BLANK {
            continue;
        }
        if op.server_id <= last {
            return Err(TableError::NonMonotonicServerId {
                index,
                found: op.server_id,
            });
        }
        last = op.server_id;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::VerifyMode;

    fn verify() -> Operation {
        Operation::new(OperationKind::Verify {
            mode: VerifyMode::Warning,
            message: String::new(),
        })
    }

    fn end_block() -> Operation {
        Operation::new(OperationKind::EndBlock)
    }

    fn block_if(close: usize, end: usize) -> Operation {
        Operation::new(OperationKind::BlockIf {
            block_close: close,
            block_end: end,
        })
    }

    fn block_else(close: usize, end: usize) -> Operation {
        Operation::new(OperationKind::BlockElse {
            block_close: close,
            block_end: end,
        })
    }

    #[test]
    fn test_validate_flat_program() {
        let ops = vec![verify(), verify()];
        assert!(validate(&ops).is_ok());
    }

    #[test]
    fn test_validate_simple_block() {
        let ops = vec![block_if(2, 2), verify(), end_block()];
        assert!(validate(&ops).is_ok());
    }

    #[test]
    fn test_validate_else_chain() {
        let ops = vec![
            block_if(2, 4),
            verify(),
            block_else(4, 4),
            verify(),
            end_block(),
        ];
        assert!(validate(&ops).is_ok());
    }

    #[test]
    fn test_validate_nested_blocks() {
        let ops = vec![
            block_if(5, 5),
            Operation::new(OperationKind::BlockLoop { block_end: 3 }),
            verify(),
            end_block(),
            verify(),
            end_block(),
        ];
        assert!(validate(&ops).is_ok());
    }

    #[test]
    fn test_validate_backward_pointer() {
        let ops = vec![verify(), block_if(0, 2), end_block()];
        assert_eq!(
            validate(&ops),
            Err(TableError::PointerNotForward {
                index: 1,
                target: 0
            })
        );
    }

    #[test]
    fn test_validate_pointer_out_of_range() {
        let ops = vec![block_if(2, 9), verify(), end_block()];
        assert_eq!(
            validate(&ops),
            Err(TableError::PointerOutOfRange {
                index: 0,
                target: 9
            })
        );
    }

    #[test]
    fn test_validate_end_target_not_end_block() {
        let ops = vec![block_if(1, 1), verify(), end_block()];
        assert!(matches!(
            validate(&ops),
            Err(TableError::BadEndTarget { index: 0, .. })
        ));
    }

    #[test]
    fn test_validate_unmatched_end_block() {
        let ops = vec![verify(), end_block()];
        assert_eq!(
            validate(&ops),
            Err(TableError::EndBlockPairing { index: 1, count: 0 })
        );
    }

    #[test]
    fn test_validate_doubly_matched_end_block() {
        // Two openers claim the same end
        let ops = vec![
            block_if(3, 3),
            Operation::new(OperationKind::BlockLoop { block_end: 3 }),
            verify(),
            end_block(),
        ];
        let result = validate(&ops);
        assert!(matches!(
            result,
            Err(TableError::EndBlockPairing { index: 3, count: 2 })
                | Err(TableError::Misnested { .. })
        ));
    }

    #[test]
    fn test_validate_orphan_branch() {
        let ops = vec![
            block_if(4, 4),
            verify(),
            block_else(4, 4),
            verify(),
            end_block(),
        ];
        assert_eq!(validate(&ops), Err(TableError::OrphanBranch { index: 2 }));
    }

    #[test]
    fn test_validate_overlapping_blocks() {
        let ops = vec![
            block_if(3, 3),
            Operation::new(OperationKind::BlockLoop { block_end: 5 }),
            verify(),
            end_block(),
            verify(),
            end_block(),
        ];
        assert!(matches!(
            validate(&ops),
            Err(TableError::Misnested { .. }) | Err(TableError::EndBlockPairing { .. })
        ));
    }

    #[test]
    fn test_validate_server_ids_must_increase() {
        let ops = vec![
            verify().with_server_id(2),
            verify().with_server_id(2),
        ];
        assert_eq!(
            validate(&ops),
            Err(TableError::NonMonotonicServerId { index: 1, found: 2 })
        );
    }

    #[test]
    fn test_validate_blank_ids_interleave() {
        let ops = vec![
            verify().with_server_id(1),
            verify(),
            verify().with_server_id(5),
        ];
        assert!(validate(&ops).is_ok());
    }

    mod properties {
        use super::*;
        use crate::table::OperationTable;
        use proptest::prelude::*;

        /// Emit a well-formed construct into `ops`: either a plain
        /// operation or a block (if / if-else / loop) with recursively
        /// generated bodies.
        fn emit(ops: &mut Vec<Operation>, shape: &Shape) {
            match shape {
                Shape::Plain => ops.push(verify()),
                Shape::If(body) => {
                    let header = ops.len();
                    ops.push(verify()); // placeholder
                    for s in body {
                        emit(ops, s);
                    }
                    let end = ops.len();
                    ops.push(end_block());
                    ops[header] = block_if(end, end);
                }
                Shape::IfElse(then_body, else_body) => {
                    let header = ops.len();
                    ops.push(verify()); // placeholder
                    for s in then_body {
                        emit(ops, s);
                    }
                    let else_at = ops.len();
                    ops.push(verify()); // placeholder
                    for s in else_body {
                        emit(ops, s);
                    }
                    let end = ops.len();
                    ops.push(end_block());
                    ops[header] = block_if(else_at, end);
                    ops[else_at] = block_else(end, end);
                }
                Shape::Loop(body) => {
                    let header = ops.len();
                    ops.push(verify()); // placeholder
                    for s in body {
                        emit(ops, s);
                    }
                    let end = ops.len();
                    ops.push(end_block());
                    ops[header] = Operation::new(OperationKind::BlockLoop { block_end: end });
                }
            }
        }

        #[derive(Debug, Clone)]
        enum Shape {
            Plain,
            If(Vec<Shape>),
            IfElse(Vec<Shape>, Vec<Shape>),
            Loop(Vec<Shape>),
        }

        fn shape_strategy() -> impl Strategy<Value = Shape> {
            let leaf = Just(Shape::Plain);
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Shape::If),
                    (
                        prop::collection::vec(inner.clone(), 0..3),
                        prop::collection::vec(inner.clone(), 0..3)
                    )
                        .prop_map(|(t, e)| Shape::IfElse(t, e)),
                    prop::collection::vec(inner, 0..4).prop_map(Shape::Loop),
                ]
            })
        }

        proptest! {
            /// Generated well-formed structures always validate, and
            /// walking close/end pointers from any opener terminates at
            /// an end-block whose own end equals the discovered end
            /// without revisiting the opener.
            #[test]
            fn generated_structures_validate(shapes in prop::collection::vec(shape_strategy(), 1..5)) {
                let mut ops = Vec::new();
                for s in &shapes {
                    emit(&mut ops, s);
                }
                prop_assert!(validate(&ops).is_ok());

                let table = OperationTable::new(ops).expect("validated");
                for (index, op) in table.iter().enumerate() {
                    if !op.is_block_open() {
                        continue;
                    }
                    let end = op.block_end().expect("opener has end");
                    // Walk the close chain; must terminate at the end
                    let mut at = index;
                    let mut steps = 0usize;
                    loop {
                        let close = table.get(at).and_then(Operation::block_close).unwrap_or(end);
                        prop_assert!(close > at, "close pointer revisits or stalls");
                        steps += 1;
                        prop_assert!(steps <= table.len(), "close chain does not terminate");
                        if table.get(close).is_some_and(Operation::is_end_block) {
                            prop_assert_eq!(close, end);
                            break;
                        }
                        at = close;
                    }
                    prop_assert_eq!(table.matching_block_start(end).is_some(), true);
                }
            }
        }
    }
}
