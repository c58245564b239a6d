use std::sync::Arc;

use tracing::{debug, info};

use crate::session_store::{CompletionTransition, SessionStore};
use crate::{SessionState, UploadResult};

/// Whether every expected hash of the session has been received.
///
/// Pure: only looks at the given snapshot.
pub fn check_completion(state: &SessionState) -> bool {
    if state.received_hashes.len() < state.expected_hashes.len() {
        return false;
    }
    state
        .expected_hashes
        .iter()
        .all(|hash| state.received_hashes.contains(hash))
}

/// Detects the `Open -> Complete` edge of a session.
///
/// The edge itself is taken by the session store's compare-and-set, so
/// across all callers exactly one `settle` returns `Won` per session.
#[derive(Clone)]
pub struct CompletionDetector {
    sessions: Arc<SessionStore>,
}

impl CompletionDetector {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Settle a session given the state observed after recording a part.
    /// Snapshots that are already complete, or still missing parts, are
    /// answered without touching the store.
    pub async fn settle(&self, state: SessionState) -> UploadResult<CompletionTransition> {
        if state.is_complete() {
            return Ok(CompletionTransition::AlreadyComplete(state));
        }
        if !check_completion(&state) {
            return Ok(CompletionTransition::NotReady(state));
        }

        let transition = self.sessions.mark_complete(&state.session_id).await?;
        match &transition {
            CompletionTransition::Won(s) => {
                info!(session_id = %s.session_id, parts = s.expected_hashes.len(), "upload complete");
            }
            CompletionTransition::AlreadyComplete(s) => {
                debug!(session_id = %s.session_id, "completion already claimed");
            }
            CompletionTransition::NotReady(_) => {}
        }
        Ok(transition)
    }
}
