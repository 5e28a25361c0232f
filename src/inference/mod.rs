pub mod citations;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod types;

pub use provider::{ChatClient, ChatRequest, MediaRequest, PromptSet, ProviderError, StreamSink};
pub use providers::{GeminiConfig, GeminiProvider, OpenAiProvider, OpenRouterProvider};
pub use types::{ChatMessage, Citation, MediaPayload, ModelInfo, Role, SendOptions, StreamAggregate};
