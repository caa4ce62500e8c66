pub mod field_path;
pub mod manager;
pub mod runtime;

pub use manager::LinkManager;
pub use runtime::{CycleReport, LinkRuntime, LinkStatus};
