//! Wire types for both sides of the translation: Anthropic in, OpenAI-compatible out.

pub mod anthropic;
pub mod openai;
