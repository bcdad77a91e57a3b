//! WizardController — owns the live wizard state, the active step's form,
//! and the onboarding draft, and persists answers as the user moves forward.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::form::{EntryChoice, StepForm};
use super::gate;
use super::state::WizardState;
use super::step::{FlowPath, Step};
use crate::auth::AuthSession;
use crate::clock::Clock;
use crate::error::{StoreError, WizardError};
use crate::profile::ProfileFields;
use crate::store::ProfileStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(20);

/// Broadcast to UI subscribers after every applied change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WizardEvent {
    StepChanged {
        from: Step,
        to: Step,
        path: FlowPath,
        can_advance: bool,
    },
    FormUpdated {
        step: Step,
        can_advance: bool,
    },
}

/// Point-in-time view of the wizard for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardSnapshot {
    pub current: Step,
    pub step_id: u8,
    pub title: &'static str,
    pub path: FlowPath,
    pub history: Vec<Step>,
    pub form: StepForm,
    pub can_advance: bool,
    pub complete: bool,
}

struct Inner {
    state: WizardState,
    form: StepForm,
    draft: ProfileFields,
    choice: Option<EntryChoice>,
    profile_created: bool,
}

/// Serializes every transition through one fair mutex: concurrent requests
/// are queued and applied in arrival order.
#[derive(Clone)]
pub struct WizardController {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<WizardEvent>,
    store: Arc<dyn ProfileStore>,
    auth: Arc<dyn AuthSession>,
    clock: Arc<dyn Clock>,
    /// Bound on each answer write; the transition lock is held meanwhile.
    write_timeout: Duration,
}

impl WizardController {
    pub fn new(
        entry: Step,
        store: Arc<dyn ProfileStore>,
        auth: Arc<dyn AuthSession>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            state: WizardState::starting_at(entry),
            form: StepForm::initial_for(entry),
            draft: ProfileFields::default(),
            choice: None,
            profile_created: false,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            events,
            store,
            auth,
            clock,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WizardEvent> {
        self.events.subscribe()
    }

    pub async fn current_step(&self) -> Step {
        self.inner.lock().await.state.current
    }

    pub async fn form(&self) -> StepForm {
        self.inner.lock().await.form.clone()
    }

    /// Answers collected so far.
    pub async fn draft(&self) -> ProfileFields {
        self.inner.lock().await.draft.clone()
    }

    /// Re-evaluated on every call.
    pub async fn can_advance(&self) -> bool {
        let inner = self.inner.lock().await;
        self.gate_open(&inner)
    }

    pub async fn snapshot(&self) -> WizardSnapshot {
        let inner = self.inner.lock().await;
        WizardSnapshot {
            current: inner.state.current,
            step_id: inner.state.current.id(),
            title: inner.state.current.display_name(),
            path: inner.state.path,
            history: inner.state.history.clone(),
            form: inner.form.clone(),
            can_advance: self.gate_open(&inner),
            complete: inner.state.is_complete(),
        }
    }

    /// Replace the active step's form. Returns whether the gate is now open.
    pub async fn update_form(&self, form: StepForm) -> Result<bool, WizardError> {
        let mut inner = self.inner.lock().await;
        let step = inner.state.current;
        if !form.belongs_to(step) {
            return Err(WizardError::FormMismatch {
                form: form.kind().to_string(),
                step: step.to_string(),
            });
        }
        inner.form = form;
        let can_advance = self.gate_open(&inner);
        debug!(step = %step, can_advance, "Form updated");
        let _ = self
            .events
            .send(WizardEvent::FormUpdated { step, can_advance });
        Ok(can_advance)
    }

    /// Gate-checked forward move. Persists the step's answer.
    pub async fn advance(&self) -> Result<Step, WizardError> {
        let mut inner = self.inner.lock().await;
        let from = inner.state.current;

        if from.is_terminal() {
            return Err(WizardError::AtTerminalStep);
        }
        if !self.gate_open(&inner) {
            return Err(WizardError::GateClosed {
                step: from.to_string(),
            });
        }

        let next = inner.state.advance(&inner.form)?;
        if let Some(choice) = inner.form.entry_choice() {
            inner.choice = Some(choice);
        }
        let answer = inner.form.answer();
        inner.draft.merge(&answer);
        inner.state = next;

        self.persist_answer(&mut inner, from, &answer).await;
        self.enter_current_step(&mut inner, from);
        Ok(inner.state.current)
    }

    /// Back one step. No-op at the first step.
    pub async fn retreat(&self) -> Step {
        let mut inner = self.inner.lock().await;
        let from = inner.state.current;
        let previous = inner.state.retreat();
        if previous == inner.state {
            debug!(step = %from, "Retreat with empty history ignored");
            return from;
        }
        inner.state = previous;
        self.enter_current_step(&mut inner, from);
        inner.state.current
    }

    /// Forced transition; bypasses the gate.
    pub async fn jump_to(&self, step: Step) -> Step {
        let mut inner = self.inner.lock().await;
        let from = inner.state.current;
        inner.state = inner.state.jump_to(step);
        self.enter_current_step(&mut inner, from);
        step
    }

    pub async fn jump_to_id(&self, id: u8) -> Result<Step, WizardError> {
        let step = Step::from_id(id)?;
        Ok(self.jump_to(step).await)
    }

    pub async fn skip_to_main(&self) -> Step {
        self.jump_to(Step::MainApp).await
    }

    /// Jump to `step` after `delay`, unless cancelled or the user has moved
    /// off the step that is current now.
    pub async fn schedule_jump(&self, step: Step, delay: Duration) -> ScheduledTransition {
        let origin = self.current_step().await;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let controller = self.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = &mut cancel_rx => {
                    debug!(origin = %origin, target = %step, "Scheduled jump cancelled");
                    return false;
                }
            }
            controller.jump_if_at(origin, step).await
        });

        debug!(origin = %origin, target = %step, delay_ms = delay.as_millis() as u64, "Jump scheduled");
        ScheduledTransition {
            cancel: Some(cancel_tx),
            handle,
        }
    }

    async fn jump_if_at(&self, origin: Step, step: Step) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state.current != origin {
            debug!(
                origin = %origin,
                current = %inner.state.current,
                target = %step,
                "Scheduled jump skipped, wizard has moved on"
            );
            return false;
        }
        inner.state = inner.state.jump_to(step);
        self.enter_current_step(&mut inner, origin);
        true
    }

    fn gate_open(&self, inner: &Inner) -> bool {
        gate::can_advance(inner.state.current, &inner.form, self.clock.today())
    }

    /// Re-seed the form for the new current step and notify subscribers.
    fn enter_current_step(&self, inner: &mut Inner, from: Step) {
        let to = inner.state.current;
        inner.form = StepForm::from_draft(to, &inner.draft, inner.choice);
        let can_advance = self.gate_open(inner);
        info!(from = %from, to = %to, path = %inner.state.path, "Wizard step changed");
        let _ = self.events.send(WizardEvent::StepChanged {
            from,
            to,
            path: inner.state.path,
            can_advance,
        });
    }

    /// Write the answer for `step` through the profile store. Failures and
    /// timeouts are logged and never undo the transition.
    async fn persist_answer(&self, inner: &mut Inner, step: Step, answer: &ProfileFields) {
        let creates_profile = step == Step::Phone
            && inner.state.path == FlowPath::SignUp
            && !inner.profile_created;
        if answer.is_empty() && !creates_profile {
            return;
        }
        let Some(user_id) = self.auth.current_user_id() else {
            debug!(step = %step, "No signed-in user, answer kept in draft only");
            return;
        };

        let write = async {
            if creates_profile {
                match self.store.create_profile(&user_id, &inner.draft).await {
                    Err(StoreError::ProfileExists { .. }) => {
                        self.store.update_fields(&user_id, &inner.draft).await
                    }
                    other => other,
                }
            } else {
                self.store.update_fields(&user_id, answer).await
            }
        };
        let outcome = tokio::time::timeout(self.write_timeout, write).await;

        match outcome {
            Ok(Ok(())) if creates_profile => {
                inner.profile_created = true;
                info!(user_id = %user_id, "Onboarding profile saved");
            }
            Ok(Ok(())) => debug!(user_id = %user_id, step = %step, "Answer persisted"),
            Ok(Err(StoreError::ProfileNotFound { .. })) if !creates_profile => {
                debug!(user_id = %user_id, step = %step, "Profile not created yet, answer kept in draft")
            }
            Ok(Err(e)) => warn!(user_id = %user_id, step = %step, error = %e, "Failed to persist answer"),
            Err(_) => warn!(
                user_id = %user_id,
                step = %step,
                timeout_secs = self.write_timeout.as_secs(),
                "Answer write timed out, kept in draft"
            ),
        }
    }
}

/// Handle to a pending delayed jump. Dropping it does not cancel.
pub struct ScheduledTransition {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<bool>,
}

impl ScheduledTransition {
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the outcome: `true` if the jump was applied.
    pub async fn fired(self) -> bool {
        self.handle.await.unwrap_or(false)
    }
}
