//! Core business logic module
//!
//! This module contains the core channel components:
//! - `transfer_log` - The authoritative ledger with aggregate balances and bounds
//! - `tracker` - Monotone best-value register for settlement claims
//! - `validator` - Structural validation of transfers, messages and fulfillments
//! - `events` - Observer-list event delivery
//! - `expiry` - Per-transfer deadline timers
//! - `engine` - The plugin engine orchestrating all of the above

pub mod engine;
pub mod events;
pub mod expiry;
pub mod tracker;
pub mod transfer_log;
pub mod validator;

pub use engine::{ConnectionState, Plugin, RequestHandler};
pub use events::EventBus;
pub use expiry::ExpiryScheduler;
pub use tracker::{MaxValueTracker, TrackerEntry};
pub use transfer_log::TransferLog;
pub use validator::Validator;
