// Public modules
pub mod cleanup;
pub mod config;
pub mod credentials;
pub mod deployment;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod stage_executor;

// Internal modules - not part of public API
pub mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
