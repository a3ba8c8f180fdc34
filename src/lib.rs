// backoff-client: outbound HTTP with predicate-driven retry and backoff
// Exposes the retry engine and its HTTP transport as a library

pub mod backoff;
pub mod cli;
pub mod config;
pub mod http;
pub mod jitter;
pub mod outcome;
pub mod predicate;
pub mod retry;
