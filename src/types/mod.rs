// Public modules
pub mod chat_completion;
pub mod chat_message;
pub mod moderation;

// Re-exports
pub use chat_completion::{
    ChatCompletion, ChatCompletionChunk, Choice, ChunkChoice, CompletionRequest, Delta, Usage,
};
pub use chat_message::{ChatMessage, Role};
pub use moderation::{ModerationRequest, ModerationResponse, ModerationResult};
