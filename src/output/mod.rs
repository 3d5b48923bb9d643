//! CLI output: JSON envelope and exit code mapping.

mod response;

pub use response::*;
