//! Core domain types and utilities for the lantern-flow platform.
//!
//! This crate provides the identifiers and the error-handling foundation
//! shared by the workflow engine and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, ParseIdError, WorkflowId};
