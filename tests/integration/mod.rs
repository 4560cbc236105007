//! Integration tests for querystage.

pub mod common;
pub mod interpreter_test;
pub mod postgres_test;
pub mod recovery_test;
pub mod staging_test;
