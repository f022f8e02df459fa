//! NARTHEX Handler Programs
//!
//! The interpretable program model: condition expressions, operations
//! (a closed tagged union, one variant per tag), and the ordered
//! immutable operation table with structural queries and validation.
//!
//! Programs arrive fully materialized from the wire decoder; this
//! crate never parses anything.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod expr;
pub mod operation;
pub mod table;
pub mod validate;

// Re-exports
pub use expr::{BinOp, Expr, FieldReader};
pub use operation::{
    DirectionGuard, ExecSite, ModeGuard, Operation, OperationKind, RaiseEventSpec, VerifyMode,
    SERVER_ID_BLANK,
};
pub use table::OperationTable;
pub use validate::TableError;
