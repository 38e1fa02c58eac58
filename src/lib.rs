//! Onboardly — customer onboarding drip-campaign engine.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod store;
pub mod substitution;
pub mod webhook;
