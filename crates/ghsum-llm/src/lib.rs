//! ghsum-llm: summary generation over an OpenAI-compatible chat API
//!
//! `ChatSummarizer` implements `ghsum_core::SummaryGenerator`. Rate-limit
//! and server errors are retried with the configured `RetryPolicy`; the
//! caller bounds concurrency through its generator budget.

mod client;
pub mod prompt;

pub use client::{ChatSummarizer, ChatSummarizerConfig, DEFAULT_BASE_URL};
