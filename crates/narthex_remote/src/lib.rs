//! NARTHEX Remote Delegation
//!
//! The client half of the delegation protocol: serialized execution
//! stack frames, request/response envelopes, and the synchronous
//! `RemoteSite` seam the interpreter calls. Transport framing is out
//! of scope; implementations wrap whatever session layer the host
//! provides.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod protocol;
pub mod site;

// Re-exports
pub use protocol::{RemoteError, RemoteOp, RemoteRequest, RemoteResponse, ServerFrame};
pub use site::{RemoteSite, ScriptedSite};
