//! Per-step form state owned by the wizard for the active step.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::step::{FlowPath, Step};
use crate::profile::{HealthGoal, ProfileFields, SleepQuality};

/// Stress slider value before the user touches it.
pub const STRESS_DEFAULT: u8 = 5;

/// Placeholder shown by the date picker until the user picks a date.
pub fn birth_date_sentinel() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Answer on the first screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryChoice {
    CreateAccount,
    SignIn,
}

impl EntryChoice {
    pub fn path(&self) -> FlowPath {
        match self {
            Self::CreateAccount => FlowPath::SignUp,
            Self::SignIn => FlowPath::SignIn,
        }
    }
}

/// Form contents for one step, tagged by the step it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepForm {
    SignInChoice {
        #[serde(default)]
        choice: Option<EntryChoice>,
    },
    Name {
        #[serde(default)]
        name: String,
    },
    BirthDate {
        date: NaiveDate,
    },
    Goals {
        #[serde(default)]
        selected: Vec<HealthGoal>,
    },
    StressLevel {
        level: u8,
    },
    SleepQuality {
        #[serde(default)]
        rating: Option<SleepQuality>,
    },
    Phone {
        #[serde(default)]
        number: String,
    },
    /// Steps without input.
    Informational,
}

impl StepForm {
    /// Blank form for `step`.
    pub fn initial_for(step: Step) -> StepForm {
        match step {
            Step::SignInChoice => StepForm::SignInChoice { choice: None },
            Step::Name => StepForm::Name {
                name: String::new(),
            },
            Step::BirthDate => StepForm::BirthDate {
                date: birth_date_sentinel(),
            },
            Step::Goals => StepForm::Goals {
                selected: Vec::new(),
            },
            Step::StressLevel => StepForm::StressLevel {
                level: STRESS_DEFAULT,
            },
            Step::SleepQuality => StepForm::SleepQuality { rating: None },
            Step::Phone => StepForm::Phone {
                number: String::new(),
            },
            Step::ScanIntro | Step::TongueScan | Step::ScanResults | Step::MainApp => {
                StepForm::Informational
            }
        }
    }

    /// Form for `step` pre-filled with earlier answers.
    pub fn from_draft(step: Step, draft: &ProfileFields, choice: Option<EntryChoice>) -> StepForm {
        match (Self::initial_for(step), step) {
            (StepForm::SignInChoice { .. }, _) => StepForm::SignInChoice { choice },
            (form, Step::Name) => draft
                .name
                .clone()
                .map(|name| StepForm::Name { name })
                .unwrap_or(form),
            (form, Step::BirthDate) => draft
                .birth_date
                .map(|date| StepForm::BirthDate { date })
                .unwrap_or(form),
            (form, Step::Goals) => draft
                .goals
                .clone()
                .map(|selected| StepForm::Goals { selected })
                .unwrap_or(form),
            (form, Step::StressLevel) => draft
                .stress_level
                .map(|level| StepForm::StressLevel { level })
                .unwrap_or(form),
            (_, Step::SleepQuality) => StepForm::SleepQuality {
                rating: draft.sleep_quality,
            },
            (form, Step::Phone) => draft
                .phone
                .clone()
                .map(|number| StepForm::Phone { number })
                .unwrap_or(form),
            (form, _) => form,
        }
    }

    /// Whether this form is the input for `step`.
    pub fn belongs_to(&self, step: Step) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::initial_for(step))
    }

    /// Tag name, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignInChoice { .. } => "sign_in_choice",
            Self::Name { .. } => "name",
            Self::BirthDate { .. } => "birth_date",
            Self::Goals { .. } => "goals",
            Self::StressLevel { .. } => "stress_level",
            Self::SleepQuality { .. } => "sleep_quality",
            Self::Phone { .. } => "phone",
            Self::Informational => "informational",
        }
    }

    /// The entry choice, on the first screen only.
    pub fn entry_choice(&self) -> Option<EntryChoice> {
        match self {
            Self::SignInChoice { choice } => *choice,
            _ => None,
        }
    }

    /// Profile fields this form contributes when the user moves forward.
    pub fn answer(&self) -> ProfileFields {
        let mut fields = ProfileFields::default();
        match self {
            Self::Name { name } => fields.name = Some(name.trim().to_string()),
            Self::BirthDate { date } if *date != birth_date_sentinel() => {
                fields.birth_date = Some(*date)
            }
            Self::Goals { selected } => {
                let mut goals = Vec::with_capacity(selected.len());
                for goal in selected {
                    if !goals.contains(goal) {
                        goals.push(*goal);
                    }
                }
                fields.goals = Some(goals);
            }
            Self::StressLevel { level } => fields.stress_level = Some(*level),
            Self::SleepQuality { rating } => fields.sleep_quality = *rating,
            Self::Phone { number } => fields.phone = Some(number.trim().to_string()),
            _ => {}
        }
        fields
    }
}
