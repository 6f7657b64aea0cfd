//! Storage layer for mnemo
//!
//! Memory fragments and their embeddings live in one SQLite database. How
//! fragments get there (chunking, extraction) is up to the caller.

pub mod codec;
pub mod database;

pub use codec::{decode_embedding, encode_embedding};
pub use database::{DbPool, FragmentStore, StoreStats};
