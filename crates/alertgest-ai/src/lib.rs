pub mod models;
pub mod prompt;
pub mod providers;
pub mod summarizer;

pub use prompt::{build_digest_prompt, DigestInput, DEFAULT_SAMPLES_PER_ALERTNAME};
pub use providers::ollama::OllamaProvider;
pub use summarizer::{Completion, SummarizeError, Summarizer, SummaryRequest};
