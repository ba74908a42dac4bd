//! Shared path→task claim index for runtime conflict detection.
//!
//! Claims are atomic check-and-set over the whole batch: either every path
//! in an iteration is claimed by the task, or none are and the collision is
//! reported. The index is owned by one parallel invocation and torn down
//! with it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::models::execution::ClaimConflict;

#[derive(Default)]
pub struct PathClaimIndex {
    claims: Mutex<HashMap<String, String>>,
}

impl PathClaimIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every path for `task_id`, or report the first collision with a
    /// different task. Re-claiming paths already owned by `task_id` is fine.
    pub fn claim_all(&self, paths: &[String], task_id: &str) -> Result<(), ClaimConflict> {
        let mut claims = self.claims.lock().expect("claim index lock");
        for path in paths {
            if let Some(winner) = claims.get(path) {
                if winner != task_id {
                    return Err(ClaimConflict {
                        path: path.clone(),
                        winner: winner.clone(),
                    });
                }
            }
        }
        for path in paths {
            claims.insert(path.clone(), task_id.to_string());
        }
        Ok(())
    }

    /// Drop every claim held by `task_id` (cancelled or finished task).
    pub fn release_task(&self, task_id: &str) {
        self.claims
            .lock()
            .expect("claim index lock")
            .retain(|_, owner| owner != task_id);
    }

    pub fn owner_of(&self, path: &str) -> Option<String> {
        self.claims
            .lock()
            .expect("claim index lock")
            .get(path)
            .cloned()
    }
}
