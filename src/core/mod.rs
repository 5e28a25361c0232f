//! # Caller-side Glue
//!
//! Everything between a user's settings and a live [`ChatClient`](crate::inference::ChatClient).
//! Knows nothing about any vendor wire format.
//!
//! ## Modules
//!
//! - [`config`]: `~/.aisource/config.toml` + env + CLI resolution
//! - [`sources`]: builds the client for the selected AI source
//! - [`attachment`]: local files to media payloads

pub mod attachment;
pub mod config;
pub mod sources;
