//! # quilt-common
//!
//! Shared utilities and types for the Quilt rootfs provisioner:
//! - Common error types
//! - Lexical path utilities

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{QuiltError, QuiltResult};
