//! The single active action and its state machine.
//!
//! Exactly one `ActiveAction` exists for the process lifetime. State moves
//! forward only: None < Processing < Downloading < Installing <
//! {Success | Error}, with Canceled reachable from Processing, Downloading
//! and CancelRequested. Installing is not cancelable.
//!
//! The mutex guards the state and id; the notify is signaled on every
//! transition so waiters can re-check. The lock is never held across I/O.

use std::sync::Mutex;
use tokio::sync::Notify;

/// Lifecycle state of the active action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    None,
    Processing,
    Downloading,
    Installing,
    CancelRequested,
    Canceled,
    Success,
    Error,
}

impl ActionState {
    /// Whether an action is currently being worked on.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ActionState::Processing
                | ActionState::Downloading
                | ActionState::Installing
                | ActionState::CancelRequested
        )
    }

    /// Whether the action has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Canceled | ActionState::Success | ActionState::Error
        )
    }
}

#[derive(Debug)]
struct ActionInner {
    id: Option<String>,
    state: ActionState,
}

/// The process-wide action monitor.
#[derive(Debug)]
pub struct ActiveAction {
    inner: Mutex<ActionInner>,
    changed: Notify,
}

impl Default for ActiveAction {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveAction {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ActionInner {
                id: None,
                state: ActionState::None,
            }),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> ActionState {
        self.inner.lock().expect("action mutex poisoned").state
    }

    pub fn id(&self) -> Option<String> {
        self.inner.lock().expect("action mutex poisoned").id.clone()
    }

    /// Claim the action slot for a new deployment.
    ///
    /// Fails when an action is already underway; terminal leftovers from a
    /// completed action do not block a new one.
    pub fn try_begin(&self) -> Result<(), AlreadyInProgress> {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        if inner.state.is_active() {
            return Err(AlreadyInProgress);
        }
        inner.id = None;
        inner.state = ActionState::Processing;
        drop(inner);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Record the server-assigned action id once known.
    pub fn assign_id(&self, id: &str) {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        inner.id = Some(id.to_string());
    }

    /// Move the action to a later state and wake waiters.
    pub fn transition(&self, to: ActionState) {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        inner.state = to;
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Ask the worker to cancel; only meaningful before Installing.
    pub fn request_cancel(&self) {
        self.transition(ActionState::CancelRequested);
    }

    /// Worker checkpoint: consume a pending cancel request.
    ///
    /// Returns true when a cancel was pending; the action is then Canceled
    /// and the coordinator waiting in `process_cancel` has been woken.
    pub fn take_cancel(&self) -> bool {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        if inner.state != ActionState::CancelRequested {
            return false;
        }
        inner.state = ActionState::Canceled;
        drop(inner);
        self.changed.notify_waiters();
        true
    }

    /// Atomically move into Installing, honoring a pending cancel request.
    ///
    /// Returns false when the action was canceled instead; once this
    /// returns true the installation is underway and can no longer be
    /// canceled.
    pub fn begin_install(&self) -> bool {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        if inner.state == ActionState::CancelRequested {
            inner.state = ActionState::Canceled;
            drop(inner);
            self.changed.notify_waiters();
            return false;
        }
        inner.state = ActionState::Installing;
        drop(inner);
        self.changed.notify_waiters();
        true
    }

    /// Wait until the predicate stops holding, returning the final state.
    pub async fn wait_while(&self, mut predicate: impl FnMut(ActionState) -> bool) -> ActionState {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // register before checking, so a transition in between still wakes us
            notified.as_mut().enable();
            let state = self.state();
            if !predicate(state) {
                return state;
            }
            notified.await;
        }
    }

    /// Clear the action after cleanup, making room for the next deployment.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("action mutex poisoned");
        inner.id = None;
        inner.state = ActionState::None;
        drop(inner);
        self.changed.notify_waiters();
    }
}

/// Raised when a deployment arrives while another is underway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deployment is already in progress")]
pub struct AlreadyInProgress;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_state() {
        let action = ActiveAction::new();
        assert_eq!(action.state(), ActionState::None);
        assert!(action.id().is_none());
    }

    #[test]
    fn test_begin_claims_slot() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        assert_eq!(action.state(), ActionState::Processing);

        // a second deployment is refused while the first is underway
        assert_eq!(action.try_begin(), Err(AlreadyInProgress));
    }

    #[test]
    fn test_begin_refused_in_every_active_state() {
        for state in [
            ActionState::Processing,
            ActionState::Downloading,
            ActionState::Installing,
            ActionState::CancelRequested,
        ] {
            let action = ActiveAction::new();
            action.try_begin().unwrap();
            action.transition(state);
            assert_eq!(action.try_begin(), Err(AlreadyInProgress), "{state:?}");
        }
    }

    #[test]
    fn test_begin_allowed_after_terminal_states() {
        for state in [
            ActionState::Canceled,
            ActionState::Success,
            ActionState::Error,
        ] {
            let action = ActiveAction::new();
            action.try_begin().unwrap();
            action.transition(state);
            assert!(action.try_begin().is_ok(), "{state:?}");
        }
    }

    #[test]
    fn test_take_cancel_only_consumes_requests() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        action.transition(ActionState::Downloading);
        assert!(!action.take_cancel());
        assert_eq!(action.state(), ActionState::Downloading);

        action.request_cancel();
        assert!(action.take_cancel());
        assert_eq!(action.state(), ActionState::Canceled);

        // second checkpoint is a no-op
        assert!(!action.take_cancel());
    }

    #[test]
    fn test_reset_clears_id() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        action.assign_id("42");
        assert_eq!(action.id().as_deref(), Some("42"));

        action.reset();
        assert_eq!(action.state(), ActionState::None);
        assert!(action.id().is_none());
    }

    #[test]
    fn test_begin_install_honors_pending_cancel() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        action.transition(ActionState::Downloading);
        action.request_cancel();

        assert!(!action.begin_install());
        assert_eq!(action.state(), ActionState::Canceled);
    }

    #[test]
    fn test_begin_install_without_cancel() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        action.transition(ActionState::Downloading);

        assert!(action.begin_install());
        assert_eq!(action.state(), ActionState::Installing);
    }

    #[test]
    fn test_active_and_terminal_partition() {
        assert!(!ActionState::None.is_active());
        assert!(!ActionState::None.is_terminal());
        assert!(ActionState::Installing.is_active());
        assert!(ActionState::CancelRequested.is_active());
        assert!(ActionState::Success.is_terminal());
        assert!(ActionState::Canceled.is_terminal());
        assert!(!ActionState::Success.is_active());
    }

    #[tokio::test]
    async fn test_wait_while_wakes_on_transition() {
        let action = Arc::new(ActiveAction::new());
        action.try_begin().unwrap();
        action.transition(ActionState::Downloading);
        action.request_cancel();

        let waiter = {
            let action = Arc::clone(&action);
            tokio::spawn(async move {
                action
                    .wait_while(|state| state == ActionState::CancelRequested)
                    .await
            })
        };

        // give the waiter time to park, then let the worker observe
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(action.take_cancel());

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ActionState::Canceled);
    }

    #[tokio::test]
    async fn test_wait_while_returns_immediately_when_already_done() {
        let action = ActiveAction::new();
        action.try_begin().unwrap();
        action.transition(ActionState::Success);

        let state = action
            .wait_while(|state| state == ActionState::CancelRequested)
            .await;
        assert_eq!(state, ActionState::Success);
    }
}
