//! Wizard state machine: where the user is and how they got there.
//!
//! Transitions are pure and return a new `WizardState`; the async
//! controller owns the live copy.

use serde::{Deserialize, Serialize};

use super::form::StepForm;
use super::step::{FlowPath, Step};
use crate::error::WizardError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardState {
    pub current: Step,
    /// Steps left by advance or jump, most recent last.
    pub history: Vec<Step>,
    pub path: FlowPath,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::starting_at(Step::SignInChoice)
    }
}

impl WizardState {
    pub fn starting_at(step: Step) -> Self {
        Self {
            current: step,
            history: Vec::new(),
            path: FlowPath::default(),
        }
    }

    /// Move to the successor of `current`. On the first screen the form's
    /// entry choice selects the path. Does not consult the gate.
    pub fn advance(&self, form: &StepForm) -> Result<WizardState, WizardError> {
        let path = match (self.current, form.entry_choice()) {
            (Step::SignInChoice, Some(choice)) => choice.path(),
            _ => self.path,
        };
        let next = self
            .current
            .successor(path)
            .ok_or(WizardError::AtTerminalStep)?;

        let mut history = self.history.clone();
        history.push(self.current);
        Ok(WizardState {
            current: next,
            history,
            path,
        })
    }

    /// Back to the previous step. No-op with empty history.
    pub fn retreat(&self) -> WizardState {
        let mut history = self.history.clone();
        match history.pop() {
            Some(previous) => WizardState {
                current: previous,
                history,
                path: self.path,
            },
            None => self.clone(),
        }
    }

    /// Forced transition. Bypasses the gate.
    pub fn jump_to(&self, step: Step) -> WizardState {
        let mut history = self.history.clone();
        history.push(self.current);
        WizardState {
            current: step,
            history,
            path: self.path,
        }
    }

    pub fn jump_to_id(&self, id: u8) -> Result<WizardState, WizardError> {
        Ok(self.jump_to(Step::from_id(id)?))
    }

    pub fn is_complete(&self) -> bool {
        self.current.is_terminal()
    }
}
