//! Common utilities and types shared across the notemirror crates.
//!
//! This module provides the error type every crate returns, the node kind
//! vocabulary and the helpers that turn remote names into local paths.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{sanitize_name, AccessToken, NodeKind};
