//! Generic utility primitives with zero domain knowledge.
//!
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `template` - String template rendering
//! - `validation` - Name and identifier validation

pub mod io;
pub mod shell;
pub mod template;
pub mod validation;
