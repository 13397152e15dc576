//! Storage for the murmur node.
//!
//! A [`KvStore`](traits::KvStore) trait with memory and SQLite backends, and
//! two typed stores on top of it: [`KeyStore`](key_store::KeyStore) for
//! password-wrapped identity blobs and [`ContactStore`](contact_store::ContactStore)
//! for the identities learned from the mesh.

pub mod contact_store;
pub mod error;
pub mod key_store;
pub mod memory;
pub mod sqlite;
pub mod traits;
