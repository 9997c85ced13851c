//! Finite State Machine for a provider attempt

use serde::{Deserialize, Serialize};

/// Attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Executor invoked, no attempt row yet
    Created,

    /// Attempt row exists, source not staged
    StagePending,

    /// Source cloned into the working directory
    Staged,

    /// Deployable manifest found
    Validated,

    /// Driver finished provisioning
    Provisioned,

    /// Attempt recorded as succeeded
    Succeeded,

    /// Attempt recorded as failed
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

/// Attempt event
#[derive(Debug, Clone)]
pub enum AttemptEvent {
    /// Attempt row fetched or created
    Registered,

    /// Repository cloned
    Cloned,

    /// Manifest validated
    Validated,

    /// Driver provisioning completed
    Provisioned,

    /// Success recorded
    Complete,

    /// Any stage failed
    Fail(String),
}

/// Attempt FSM
#[derive(Debug, Clone)]
pub struct AttemptFsm {
    state: AttemptState,
    error: Option<String>,
}

impl AttemptFsm {
    /// Create a new FSM in created state
    pub fn new() -> Self {
        Self {
            state: AttemptState::Created,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: AttemptEvent) -> Result<AttemptState, String> {
        let new_state = match (self.state, &event) {
            (AttemptState::Created, AttemptEvent::Registered) => AttemptState::StagePending,
            (AttemptState::StagePending, AttemptEvent::Cloned) => AttemptState::Staged,
            (AttemptState::Staged, AttemptEvent::Validated) => AttemptState::Validated,
            (AttemptState::Validated, AttemptEvent::Provisioned) => AttemptState::Provisioned,
            (AttemptState::Provisioned, AttemptEvent::Complete) => AttemptState::Succeeded,

            // Failure is reachable from every non-terminal state
            (state, AttemptEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                AttemptState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for AttemptFsm {
    fn default() -> Self {
        Self::new()
    }
}
