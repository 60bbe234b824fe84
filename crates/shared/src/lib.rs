#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadPilot Shared Types and Utilities
//!
//! This crate contains types and utilities shared across the LeadPilot
//! platform.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
