//! Step catalog for the onboarding wizard.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WizardError;

/// Which branch of the wizard the user is on, chosen on `SignInChoice`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPath {
    #[default]
    SignUp,
    SignIn,
}

impl std::fmt::Display for FlowPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignUp => write!(f, "sign_up"),
            Self::SignIn => write!(f, "sign_in"),
        }
    }
}

/// Onboarding steps, ordered by their stable numeric id.
///
/// Sign-up: SignInChoice → Name → BirthDate → Goals → StressLevel →
/// SleepQuality → Phone → ScanIntro → TongueScan → ScanResults → MainApp.
/// Sign-in: SignInChoice → Phone → MainApp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    SignInChoice,
    Name,
    BirthDate,
    Goals,
    StressLevel,
    SleepQuality,
    Phone,
    ScanIntro,
    TongueScan,
    ScanResults,
    MainApp,
}

impl Step {
    /// Every step, in id order.
    pub const ALL: [Step; 11] = [
        Step::SignInChoice,
        Step::Name,
        Step::BirthDate,
        Step::Goals,
        Step::StressLevel,
        Step::SleepQuality,
        Step::Phone,
        Step::ScanIntro,
        Step::TongueScan,
        Step::ScanResults,
        Step::MainApp,
    ];

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Step, WizardError> {
        Self::ALL
            .get(usize::from(id))
            .copied()
            .ok_or(WizardError::InvalidStep { id })
    }

    /// Title shown for the step.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SignInChoice => "Welcome",
            Self::Name => "What's your name?",
            Self::BirthDate => "When were you born?",
            Self::Goals => "Your health goals",
            Self::StressLevel => "Stress level",
            Self::SleepQuality => "Sleep quality",
            Self::Phone => "Phone number",
            Self::ScanIntro => "Tongue scan",
            Self::TongueScan => "Scan your tongue",
            Self::ScanResults => "Your results",
            Self::MainApp => "Home",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MainApp)
    }

    /// Default next step on `path`, or `None` at the terminal step.
    pub fn successor(&self, path: FlowPath) -> Option<Step> {
        use Step::*;
        match path {
            FlowPath::SignIn => match self {
                SignInChoice => Some(Phone),
                MainApp => None,
                _ => Some(MainApp),
            },
            FlowPath::SignUp => match self {
                SignInChoice => Some(Name),
                Name => Some(BirthDate),
                BirthDate => Some(Goals),
                Goals => Some(StressLevel),
                StressLevel => Some(SleepQuality),
                SleepQuality => Some(Phone),
                Phone => Some(ScanIntro),
                ScanIntro => Some(TongueScan),
                TongueScan => Some(ScanResults),
                ScanResults => Some(MainApp),
                MainApp => None,
            },
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SignInChoice => "sign_in_choice",
            Self::Name => "name",
            Self::BirthDate => "birth_date",
            Self::Goals => "goals",
            Self::StressLevel => "stress_level",
            Self::SleepQuality => "sleep_quality",
            Self::Phone => "phone",
            Self::ScanIntro => "scan_intro",
            Self::TongueScan => "tongue_scan",
            Self::ScanResults => "scan_results",
            Self::MainApp => "main_app",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.to_string() == s)
            .ok_or_else(|| format!("unknown step '{s}'"))
    }
}
