//! The remote execution seam.
//!
//! Calls are synchronous and blocking: no operation proceeds past a
//! delegation until the reply returns. In-flight calls cannot be
//! cancelled; the engine aborts after the reply via stop-execution.

use crate::protocol::{RemoteError, RemoteRequest, RemoteResponse};
use std::collections::VecDeque;

/// A remote collaborator that executes delegated operations
pub trait RemoteSite {
    /// Execute a delegated operation
    ///
    /// The reply reports the server's resulting execution stack so the
    /// client can determine which operations the server executed.
    ///
    /// # Errors
    ///
    /// Returns error on transport or protocol failure; the engine
    /// aborts the current chain
    fn execute(&mut self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// In-process site replaying canned replies, for tests and harnesses
///
/// Replies are served in push order; once the script runs dry, every
/// request is answered in-sync (the server executed nothing beyond the
/// delegated operation). All received requests are recorded.
#[derive(Debug, Default)]
pub struct ScriptedSite {
    replies: VecDeque<Result<RemoteResponse, RemoteError>>,
    requests: Vec<RemoteRequest>,
}

impl ScriptedSite {
    /// Create a site with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn push_response(&mut self, response: RemoteResponse) {
        self.replies.push_back(Ok(response));
    }

    /// Queue a transport failure
    pub fn push_error(&mut self, error: RemoteError) {
        self.replies.push_back(Err(error));
    }

    /// Requests received so far, in order
    #[must_use]
    pub fn requests(&self) -> &[RemoteRequest] {
        &self.requests
    }

    /// Number of unserved scripted replies
    #[must_use]
    pub fn pending(&self) -> usize {
        self.replies.len()
    }
}

impl RemoteSite for ScriptedSite {
    fn execute(&mut self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let reply = match self.replies.pop_front() {
            Some(reply) => reply,
            None => Ok(RemoteResponse::in_sync(&request)),
        };
        self.requests.push(request);
        reply
    }
}
