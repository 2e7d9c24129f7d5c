//! Auth server HTTP API module.
//!
//! # Purpose
//! Route handler modules, shared error helpers and payload types.
pub mod authorize;
pub mod catalog;
pub mod error;
pub mod openapi;
pub mod policies;
pub mod pull;
pub mod system;
pub mod types;
