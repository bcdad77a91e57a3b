//! Tongue Check — onboarding wizard and tongue-scan pipeline core.

pub mod analysis;
pub mod auth;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod pipeline;
pub mod profile;
pub mod store;
