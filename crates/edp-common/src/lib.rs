//! EDP Common Library
//!
//! Shared types, utilities, and error handling for the EDP workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all EDP workspace
//! members:
//!
//! - **Error Handling**: the workspace error type and result alias
//! - **Checksums**: content-hash utilities used for source change detection
//! - **Logging**: tracing setup shared by the CLI and library consumers

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{EdpError, Result};
