//! Common utilities for strata
//!
//! This crate provides shared functionality used across all strata modules.

pub mod error;

pub use error::{Result, StrataError};
