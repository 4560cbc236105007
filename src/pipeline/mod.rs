//! Statement execution pipeline.
//!
//! Dispatches each statement by intent (plain, export, CSV load), turns
//! results and failures into [`QueryOutput`](crate::output::QueryOutput)s and
//! recovers from broken session transports with one reopen and retry.

mod executor;
pub mod format;

pub use executor::{Pipeline, EXECUTION_ERROR_PREFIX, REOPEN_FAILED_MESSAGE};
pub use format::SUCCESS_TEXT;
