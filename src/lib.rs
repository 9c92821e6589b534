//! # Chatsumma
//!
//! Organise pasted AI chat transcripts with an LLM and export them as CSV.
//!
//! ## Pipeline
//!
//! - **Split**: a paste is cut into chats on lines containing exactly `-----`
//! - **Extract**: one model call per chat returns title, summary, tags, bullets and action items
//! - **Normalize**: loosely-typed output is coerced into a fixed [`Record`]
//! - **Aggregate**: failures stay per chat; only a bad API key aborts the batch
//! - **Export**: records become CSV rows with a fixed header

pub mod agent;
pub mod batch;
pub mod config;
pub mod export;
pub mod gemini;
pub mod normalize;
pub mod openai;
pub mod record;
pub mod splitter;
pub mod ui;

pub use agent::{Credentials, ExtractError, Extractor};
pub use batch::{BatchError, BatchOptions, BatchProcessor, ProgressObserver};
pub use config::Config;
pub use record::{BatchResult, Record, RecordStatus, Transcript};
