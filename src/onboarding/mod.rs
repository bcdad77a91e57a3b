//! Onboarding wizard: entry routing, step catalog, per-step forms and
//! gates, the transition controller, and its HTTP/WS surface.
//!
//! The routing policy picks the entry step once at launch. From there the
//! controller applies advance/retreat/jump requests one at a time, gated by
//! `gate::can_advance`. The scan step hands off to the pipeline, which
//! jumps the wizard to the results step on success.

pub mod controller;
pub mod form;
pub mod gate;
pub mod routes;
pub mod routing;
pub mod state;
pub mod step;

pub use controller::{ScheduledTransition, WizardController, WizardEvent, WizardSnapshot};
pub use form::{EntryChoice, StepForm};
pub use routes::{AppState, app_routes};
pub use routing::{AuthState, CachedHints, decide_entry_step, resolve_entry_step};
pub use state::WizardState;
pub use step::{FlowPath, Step};
