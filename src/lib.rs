//! Consensus tiers library
//!
//! Classifies token mints into escalating tiers (T1 social consensus, T2
//! market confirmation, T3 momentum) from mention streams and on-chain and
//! market telemetry, alerts at most once per upgrade and tracks outcomes.

pub mod alert;
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod outcomes;
pub mod probes;
pub mod state;
pub mod tier;
pub mod types;
pub mod vip;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, Probes};
pub use error::{Error, Result};
pub use tier::Tier;
