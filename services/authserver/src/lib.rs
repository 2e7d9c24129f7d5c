//! CMDB authorization bridge service library.
//!
//! # Purpose
//! Exposes the auth server modules so integration tests and tooling can build
//! routers and state without starting the binary.
pub mod api;
pub mod app;
pub mod authorizer;
pub mod config;
pub mod iam;
pub mod lister;
pub mod model;
pub mod observability;
pub mod reconciler;
pub mod store;
