pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod parse;
pub mod prompts;
pub mod sanitize;
pub mod types;

// Re-exports for convenience
pub use client::{ChatClient, ChatClientBuilder, ChatService, ChunkStream};
pub use config::ChatConfig;
pub use error::{ChatError, ChatErrorKind};
pub use prompts::TravelProfile;
pub use types::*;
