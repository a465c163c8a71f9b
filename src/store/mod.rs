pub mod jobs;
pub mod usage;

pub use jobs::{InMemoryJobStore, JobStore};
pub use usage::{InMemoryUsageStore, UsageStore};
