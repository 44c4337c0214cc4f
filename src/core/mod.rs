// Public modules
pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod gate;
pub mod pipeline;
pub mod probe;
pub mod services;
pub mod ssh;
pub mod tasks;

// Internal modules - not part of public API
pub(crate) mod paths;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, ErrorKind, Result};
