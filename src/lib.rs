pub mod config;
pub mod error;
pub mod membership;
pub mod telemetry;
