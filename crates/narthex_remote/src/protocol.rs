//! Delegation protocol envelopes.
//!
//! Stack frames travel in server coordinates: a frame's position is a
//! server sequence id, not a local operation index. Blank operations
//! are never transmitted and never occupy a frame.

use narthex_core::{FieldId, HandlerId, TaskId};
use serde::{Deserialize, Serialize};

/// Delegation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote collaborator cannot be reached
    #[error("remote site unavailable: {0}")]
    Unavailable(String),

    /// The reply violated the protocol
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The remote collaborator refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// One execution-stack frame in server coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Task of the invocation
    pub task: TaskId,
    /// Handler of the invocation
    pub handler: HandlerId,
    /// Server sequence id of the position within the handler
    pub position: u32,
}

impl ServerFrame {
    /// Create a frame
    #[must_use]
    pub const fn new(task: TaskId, handler: HandlerId, position: u32) -> Self {
        Self {
            task,
            handler,
            position,
        }
    }
}

/// What the client asks the server to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOp {
    /// Execute one server-site operation
    Operation {
        /// Server sequence id of the operation
        server_id: u32,
    },
    /// Evaluate a server-site branch chain and pick the branch
    Branch {
        /// Server sequence id of the chain opener
        server_id: u32,
    },
    /// Invoke a handler remotely
    Call {
        /// Target handler
        handler: HandlerId,
        /// Server sequence id of the call operation
        server_id: u32,
    },
    /// Incrementally update a linked field
    LinkedUpdate {
        /// Target field
        field: FieldId,
        /// Server sequence id of the update operation
        server_id: u32,
    },
}

impl RemoteOp {
    /// Server sequence id of the delegated operation
    #[must_use]
    pub const fn server_id(&self) -> u32 {
        match self {
            Self::Operation { server_id }
            | Self::Branch { server_id }
            | Self::Call { server_id, .. }
            | Self::LinkedUpdate { server_id, .. } => *server_id,
        }
    }
}

/// A delegation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// The client's execution stack at the moment of delegation,
    /// innermost frame last
    pub stack: Vec<ServerFrame>,
    /// The delegated operation
    pub op: RemoteOp,
}

impl RemoteRequest {
    /// Create a request
    #[must_use]
    pub fn new(stack: Vec<ServerFrame>, op: RemoteOp) -> Self {
        Self { stack, op }
    }
}

/// A delegation reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// The server's execution stack after it stopped, innermost frame
    /// last; compared frame-by-frame against the client's stack to
    /// find the resume point
    pub executed: Vec<ServerFrame>,
    /// Whether remote execution succeeded
    pub success: bool,
    /// Error description when it did not
    pub error: Option<String>,
}

impl RemoteResponse {
    /// A successful reply reporting the server's stack
    #[must_use]
    pub fn success(executed: Vec<ServerFrame>) -> Self {
        Self {
            executed,
            success: true,
            error: None,
        }
    }

    /// A failed reply
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self {
            executed: Vec::new(),
            success: false,
            error: Some(message.to_string()),
        }
    }

    /// A reply reporting the server executed nothing beyond the
    /// delegated operation: its stack equals the request's
    #[must_use]
    pub fn in_sync(request: &RemoteRequest) -> Self {
        Self::success(request.stack.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(position: u32) -> ServerFrame {
        ServerFrame::new(
            TaskId::from_name("t"),
            HandlerId::from_name("h"),
            position,
        )
    }

    #[test]
    fn test_remote_op_server_id() {
        assert_eq!(RemoteOp::Operation { server_id: 4 }.server_id(), 4);
        assert_eq!(
            RemoteOp::Call {
                handler: HandlerId::new(),
                server_id: 9
            }
            .server_id(),
            9
        );
    }

    #[test]
    fn test_response_success() {
        let response = RemoteResponse::success(vec![make_test_frame(1)]);
        assert!(response.success);
        assert!(response.error.is_none());
        assert_eq!(response.executed.len(), 1);
    }

    #[test]
    fn test_response_error() {
        let response = RemoteResponse::error("session dropped");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("session dropped"));
        assert!(response.executed.is_empty());
    }

    #[test]
    fn test_response_in_sync_echoes_stack() {
        let request = RemoteRequest::new(
            vec![make_test_frame(1), make_test_frame(3)],
            RemoteOp::Operation { server_id: 3 },
        );
        let response = RemoteResponse::in_sync(&request);
        assert!(response.success);
        assert_eq!(response.executed, request.stack);
    }

    #[test]
    fn test_round_trip_serde() {
        let request = RemoteRequest::new(
            vec![make_test_frame(2)],
            RemoteOp::LinkedUpdate {
                field: FieldId::from_name("qty"),
                server_id: 2,
            },
        );
        let encoded = serde_json::to_string(&request).expect("encode");
        let decoded: RemoteRequest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, request);
    }
}
