pub mod pruner;

pub use pruner::{MaintenanceJob, PruneStats};
