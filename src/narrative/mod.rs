//! Narrative generation.
//!
//! Builds a prompt per activity group, sends it to a language model and
//! interprets the answer.

pub mod generator;
pub mod llm;
pub mod parse;
pub mod prompt;

pub use generator::{Generated, NarrativeGenerator};
pub use llm::{select_model, LanguageModel, OfflineSummarizer};
pub use parse::parse_narrative;
pub use prompt::build_request;
