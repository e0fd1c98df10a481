//! Common error types for `cellbox`.
//!
//! This crate provides the error variants shared by every `cellbox` crate so that
//! I/O, configuration and timeout failures read the same wherever they surface.
//!
//! # Usage
//!
//! ```rust
//! use cellbox_error::CommonError;
//!
//! fn example() -> Result<(), CommonError> {
//!     Err(CommonError::config("port range exceeds 65535"))
//! }
//! ```
//!
//! # Crate-Specific Errors
//!
//! Each crate defines its own error type that wraps `CommonError`:
//!
//! ```rust,ignore
//! use cellbox_error::CommonError;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum PoolError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("port pool is exhausted")]
//!     Exhausted,
//! }
//! ```

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
