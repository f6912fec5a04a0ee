pub mod backoff;
pub mod engine;
pub mod entry;
pub mod error;
