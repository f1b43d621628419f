//! DM funnel — decides whether and how to reply to each inbound direct
//! message.

pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod intent;
pub mod provider;
pub mod safety;
pub mod similarity;
pub mod store;
pub mod templates;
