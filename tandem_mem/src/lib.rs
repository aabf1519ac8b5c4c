//! # Tandem memory store
//!
//! In-memory implementations of the tandem collaborator interfaces, primarily
//! for testing.
//!
//! - [`InMemoryDocumentStore`] keeps collections in a map and enforces unique
//!   indexes, so duplicate migration records are rejected the same way a real
//!   document store would reject them.
//! - [`InMemoryColumnarClient`] records every statement it receives and can be
//!   scripted to fail, which is how retry and reconnect behaviour is exercised.

#![deny(missing_docs)]

mod columnar;
mod document_store;

pub use columnar::*;
pub use document_store::*;
