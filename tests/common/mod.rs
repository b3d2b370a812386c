//! Common test infrastructure
//!
//! A fake Firestore REST endpoint plus the JSON bodies it answers with.
//! Tests import from this module only.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::*;
//!
//! #[tokio::test]
//! async fn test_begin() {
//!     let server = FakeFirestore::spawn().await;
//!     server.respond("beginTransaction", 200, begin_ok());
//!     // point FirestoreStore::with_emulator at server.host
//! }
//! ```

#![allow(dead_code)]

mod fake_firestore;
mod fixtures;

#[allow(unused_imports)]
pub use fake_firestore::{FakeFirestore, RecordedRequest};
#[allow(unused_imports)]
pub use fixtures::*;
