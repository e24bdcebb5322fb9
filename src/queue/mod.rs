//! Bookkeeping for in-flight downloads

pub mod registry;

pub use registry::{JobHandle, JobRegistry};
