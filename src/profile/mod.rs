//! User profile document and derived health stats.

pub mod model;
pub mod stats;

pub use model::{
    HealthGoal, HealthStats, ProfileFields, SleepQuality, TongueAnalysisRecord, UserProfile,
};
pub use stats::{compute_stats, compute_streak, recompute_stats};
