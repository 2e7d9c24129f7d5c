//! CMDB model access for the auth server.
//!
//! # Purpose
//! Reads model definitions from the resource store and caches the model id to
//! object id mapping used by per-model pull requests.
mod cache;

pub use cache::{ModelCache, list_models};
