pub mod commands;
pub mod config;
pub mod monitor;
pub mod notifications;
pub mod probe;
pub mod scheduler;
pub mod secrets;
pub mod store;
