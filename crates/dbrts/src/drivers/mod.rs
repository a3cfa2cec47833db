//! Database drivers.
//!
//! - [`postgres`]: pooled connections, row decoding and paged reads/writes
//! - [`mongo`]: the [`mongo::DocumentStore`] seam and its MongoDB client
//! - [`common`]: TLS settings shared by connection setup

pub mod common;
pub mod mongo;
pub mod postgres;

pub use common::SslMode;
