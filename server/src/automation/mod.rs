//! Automation Rules
//!
//! Rule types, trigger matching, and execution of matched actions.

pub mod collaborators;
mod error;
pub mod executor;
pub mod matcher;
pub mod types;

pub use error::AutomationError;
pub use executor::{ActionExecutor, ExecutionContext};
pub use matcher::RuleMatcher;
