pub mod cache;
pub mod client;

pub use cache::ResponseCache;
pub use client::{ClientMetrics, LlmClient, StructuredValidator};
