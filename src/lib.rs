//! Mnemo - retrieval-augmented answers from a local fragment memory
//!
//! Ranks stored memory fragments against a question with ONNX sentence
//! embeddings and keyword boosts, then runs a local inference executable from
//! a bounded worker pool to answer from the best fragments.

pub mod assistant;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod prompt;
pub mod retrieval;
pub mod storage;
pub mod worker;

pub use error::{MnemoError, Result};
