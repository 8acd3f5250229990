//! lantern-flow HTTP server.
//!
//! This crate wires the workflow engine to its outer surfaces: the HTTP API,
//! Postgres persistence, and the queue workers started by the binary.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
