//! querystage - script runner for notebook clients.
//!
//! Runs multi-statement scripts against a remote query service that has no
//! cancel primitive, recovers from broken session transports, and stages
//! exported results in a bounded local cache served back as download links.

pub mod cli;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod jobs;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod script;
pub mod session;
pub mod staging;
