//! Autopilot Server
//!
//! Receives signed webhooks from social platforms and the payment provider,
//! remembers every conversation, and answers participants through
//! workspace-defined automation rules.

pub mod api;
pub mod automation;
pub mod config;
pub mod conversations;
pub mod db;
pub mod retention;
pub mod store;
pub mod webhooks;
