//! Asynchronous job runs keyed by external job id.

mod registry;

pub use registry::{JobHandle, JobRegistry, CANCEL_THROTTLE};
