//! Process-wide keyed store of workflow state.
//!
//! The store records intent; it never stops work itself. Cancellation flags
//! live apart from state so a cancel can be requested before the state exists
//! and is still seen by a run that starts later.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{WorkflowError, WorkflowResult, WorkflowState};

#[derive(Debug, Default)]
pub struct WorkflowStateStore {
    states: DashMap<String, WorkflowState>,
    cancellations: DashMap<String, CancellationToken>,
}

impl WorkflowStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the state under `state.id`.
    ///
    /// A terminal state is never replaced and status never moves backwards.
    pub fn set(&self, state: WorkflowState) -> WorkflowResult<()> {
        match self.states.entry(state.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_transition(entry.get(), &state)?;
                entry.insert(state);
            }
            Entry::Vacant(entry) => {
                entry.insert(state);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<WorkflowState> {
        self.states.get(id).map(|entry| entry.value().clone())
    }

    /// Apply `f` to the stored state atomically and return the result
    pub fn update<F>(&self, id: &str, f: F) -> WorkflowResult<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut entry = self
            .states
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        let mut next = entry.value().clone();
        f(&mut next);
        check_transition(entry.value(), &next)?;
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    /// Remove the state and any cancellation flag
    pub fn delete(&self, id: &str) -> Option<WorkflowState> {
        self.cancellations.remove(id);
        self.states.remove(id).map(|(_, state)| state)
    }

    /// Record a cancellation request; idempotent
    pub fn request_cancel(&self, id: &str) {
        debug!(workflow_id = id, "Cancellation requested");
        self.cancel_token(id).cancel();
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.cancellations
            .get(id)
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    /// Token tied to this workflow's cancellation flag, created on first use
    pub fn cancel_token(&self, id: &str) -> CancellationToken {
        self.cancellations.entry(id.to_string()).or_default().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.states.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn check_transition(current: &WorkflowState, next: &WorkflowState) -> WorkflowResult<()> {
    if current.status.is_terminal() {
        return Err(WorkflowError::Terminal {
            id: current.id.clone(),
            status: current.status,
        });
    }
    if !current.status.can_transition_to(next.status) {
        return Err(WorkflowError::InvalidTransition {
            from: current.status,
            to: next.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{WorkflowInput, WorkflowStatus};

    fn pending(id: &str) -> WorkflowState {
        WorkflowState::pending(id, WorkflowInput::new("checkout"), ["observation"])
    }

    #[test]
    fn test_set_get_delete() {
        let store = WorkflowStateStore::new();
        store.set(pending("wf-1")).unwrap();
        assert_eq!(store.get("wf-1").unwrap().status, WorkflowStatus::Pending);
        assert_eq!(store.len(), 1);
        assert!(store.delete("wf-1").is_some());
        assert!(store.get("wf-1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_cancel_before_state_exists() {
        let store = WorkflowStateStore::new();
        store.request_cancel("wf-2");
        store.request_cancel("wf-2");
        assert!(store.is_cancel_requested("wf-2"));
        assert!(store.cancel_token("wf-2").is_cancelled());
        assert!(!store.is_cancel_requested("other"));

        store.delete("wf-2");
        assert!(!store.is_cancel_requested("wf-2"));
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let store = WorkflowStateStore::new();
        store.set(pending("wf-3")).unwrap();
        store
            .update("wf-3", |s| s.finish(WorkflowStatus::Cancelled, None))
            .unwrap();

        assert!(matches!(store.set(pending("wf-3")), Err(WorkflowError::Terminal { .. })));
        assert!(matches!(
            store.update("wf-3", |s| s.error = Some("late".into())),
            Err(WorkflowError::Terminal { .. })
        ));
        assert!(store.get("wf-3").unwrap().error.is_none());
    }

    #[test]
    fn test_update_rejects_backwards_status() {
        let store = WorkflowStateStore::new();
        store.set(pending("wf-4")).unwrap();
        store.update("wf-4", |s| s.status = WorkflowStatus::Running).unwrap();
        let err = store.update("wf-4", |s| s.status = WorkflowStatus::Pending).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert!(matches!(store.update("missing", |_| {}), Err(WorkflowError::NotFound(_))));
    }
}
