//! Remote notebook API access for notemirror.
//!
//! This module provides everything between the sync engine and the wire:
//! - A trait-based HTTP transport seam with a `reqwest` implementation
//!   and an in-memory double for tests
//! - A rate-limited fetcher that classifies responses and backs off on 429
//! - A paginator for cursor-linked list responses
//! - The typed remote node model and a client naming the API's listings
//!
//! # Design Principles
//! - Transport isolation: only `transport.rs` knows about `reqwest`
//! - Bounded in-flight requests shared by every caller of one fetcher
//! - Failures are classified, never swallowed

pub mod backoff;
pub mod client;
pub mod fetcher;
pub mod memory;
pub mod model;
pub mod paginator;
pub mod transport;

pub use backoff::BackoffConfig;
pub use client::{GraphClient, DEFAULT_API_BASE};
pub use fetcher::{FetchedBody, Fetcher};
pub use memory::MemoryTransport;
pub use model::{Listing, RemoteNode};
pub use paginator::list_all;
pub use transport::{HttpTransport, RawResponse, ReqwestTransport};
