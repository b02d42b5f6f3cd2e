pub mod model;
pub mod service;

pub use model::{HostConfig, HostJob, HostStatus};
pub use service::{MonitorError, MonitoringService};
