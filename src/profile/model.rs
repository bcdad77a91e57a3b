//! User profile and onboarding answer models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::DiagnosisResult;

/// Wellness goals offered on the goals step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGoal {
    BetterSleep,
    LessStress,
    Digestion,
    Energy,
    WeightBalance,
    Immunity,
    SkinHealth,
}

impl std::fmt::Display for HealthGoal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BetterSleep => "better_sleep",
            Self::LessStress => "less_stress",
            Self::Digestion => "digestion",
            Self::Energy => "energy",
            Self::WeightBalance => "weight_balance",
            Self::Immunity => "immunity",
            Self::SkinHealth => "skin_health",
        };
        write!(f, "{s}")
    }
}

/// Self-reported sleep quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Derived counters, recomputed from the analysis history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStats {
    /// Consecutive calendar days, ending today, with at least one check-in.
    pub streak_days: u32,
    pub total_check_ins: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_in: Option<DateTime<Utc>>,
}

/// One persisted tongue analysis. Appended, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TongueAnalysisRecord {
    /// Minted once per successful analysis; appends are idempotent on it.
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub result: DiagnosisResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl TongueAnalysisRecord {
    pub fn new(result: DiagnosisResult, image_ref: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            result,
            image_ref,
        }
    }
}

/// Profile document owned by the profile store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub goals: Vec<HealthGoal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<SleepQuality>,
    #[serde(default)]
    pub health_stats: HealthStats,
    /// Append-only, in insertion order.
    #[serde(default)]
    pub analysis_history: Vec<TongueAnalysisRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Empty profile for `user_id`.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            birth_date: None,
            phone: None,
            goals: Vec::new(),
            stress_level: None,
            sleep_quality: None,
            health_stats: HealthStats::default(),
            analysis_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The field set (everything except history and timestamps).
    pub fn fields(&self) -> ProfileFields {
        ProfileFields {
            name: self.name.clone(),
            birth_date: self.birth_date,
            phone: self.phone.clone(),
            goals: Some(self.goals.clone()),
            stress_level: self.stress_level,
            sleep_quality: self.sleep_quality,
            health_stats: Some(self.health_stats.clone()),
        }
    }
}

/// Partial profile update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Vec<HealthGoal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<SleepQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_stats: Option<HealthStats>,
}

impl ProfileFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay the set fields of `other` onto `self`.
    pub fn merge(&mut self, other: &ProfileFields) {
        if let Some(ref name) = other.name {
            self.name = Some(name.clone());
        }
        if let Some(date) = other.birth_date {
            self.birth_date = Some(date);
        }
        if let Some(ref phone) = other.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(ref goals) = other.goals {
            self.goals = Some(goals.clone());
        }
        if let Some(level) = other.stress_level {
            self.stress_level = Some(level);
        }
        if let Some(quality) = other.sleep_quality {
            self.sleep_quality = Some(quality);
        }
        if let Some(ref stats) = other.health_stats {
            self.health_stats = Some(stats.clone());
        }
    }

    /// Write the set fields into a profile.
    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(ref name) = self.name {
            profile.name = Some(name.clone());
        }
        if let Some(date) = self.birth_date {
            profile.birth_date = Some(date);
        }
        if let Some(ref phone) = self.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(ref goals) = self.goals {
            profile.goals = goals.clone();
        }
        if let Some(level) = self.stress_level {
            profile.stress_level = Some(level);
        }
        if let Some(quality) = self.sleep_quality {
            profile.sleep_quality = Some(quality);
        }
        if let Some(ref stats) = self.health_stats {
            profile.health_stats = stats.clone();
        }
    }
}
