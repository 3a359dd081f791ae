//! Agent system prompts

mod loader;

pub use loader::{PromptError, PromptLoader, PromptProvider, fallback_prompt};
