//! NARTHEX Core Types
//!
//! This crate contains pure types with no I/O: entity identifiers,
//! field values, flow direction and break levels, and the shared
//! error type. Everything here is serializable.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod flow;
pub mod id;
pub mod value;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use event::{EventKind, EventPriority, EventTarget, InternalCode};
pub use flow::{BreakLevel, FlowDirection, FlowMode};
pub use id::{ControlId, EventId, FieldId, HandlerId, TaskId};
pub use value::Value;
