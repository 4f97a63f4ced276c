//! Conversation Memory
//!
//! Per-participant conversation state, message history, and short-lived
//! context facts extracted from inbound messages.

pub mod analysis;
pub mod types;
