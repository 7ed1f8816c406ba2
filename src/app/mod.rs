pub mod config;
pub mod initialization;
pub mod logging_system;
pub mod service;

pub use config::{ConfigError, LogLevel, SinkConfig};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging};
pub use service::{Collaborators, RemoteSink, Submission};

pub fn get_version() -> String {
    crate::VERSION.to_string()
}
