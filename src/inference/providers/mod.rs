mod chat_completions;
pub mod gemini;
mod media;
pub mod openai;
pub mod openrouter;

pub use gemini::{GeminiConfig, GeminiProvider};
pub use openai::OpenAiProvider;
pub use openrouter::{OpenRouterAttribution, OpenRouterProvider};
