// Public modules
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod observability;
pub mod paths;
pub mod prompt;
pub mod render;
pub mod session;
pub mod shell;
pub mod types;
pub mod utils;

mod sse;

// Re-exports
pub use client::{CompletionClient, ModerationClient, OpenAi};
pub use commands::{CommandOutcome, Directive, help_text, parse_directive};
pub use config::{ConfigStore, SessionConfig, ShellType};
pub use context::{ContextBuffer, Snapshot, TOKEN_CEILING, word_count};
pub use credentials::{
    CredentialKind, CredentialSource, Credentials, EnvCredentials, FileCredentials,
    HybridCredentials, Language,
};
pub use encoding::{Decoded, TextEncoding, decode_with_fallback};
pub use error::{Error, Result};
pub use paths::DataLayout;
pub use render::{PlainTextRenderer, RecordingRenderer, Renderer};
pub use session::{Invocation, QueryOutcome, Session, SessionController};
pub use sse::StreamEvent;
pub use types::*;
