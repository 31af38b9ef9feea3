//! citeseek - scoped hybrid retrieval for multi-tenant document QA
//!
//! Expands a question into query variations, runs vector and keyword search
//! over one corpus snapshot, fuses the ranked lists and returns access-checked
//! passages with citations.

pub mod access;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod retrieval;
pub mod retry;
pub mod search;
pub mod storage;
pub mod variation;

pub use error::{CiteseekError, Result};
