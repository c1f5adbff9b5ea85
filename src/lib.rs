pub mod callback;
pub mod config;
pub mod consensus;
pub mod dispatch;
pub mod error;
pub mod matrix;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod results;
pub mod server;
pub mod shutdown;
pub mod tunnel;
