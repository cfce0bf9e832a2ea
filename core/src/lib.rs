//! Backend integration for the native-messaging host: the koboldcpp HTTP
//! client, incremental-output streaming, the conversation store, and the
//! per-task session dispatcher.

pub mod api;
pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod prompt;
pub mod session;
pub mod streaming;

pub use client::KoboldClient;
pub use config::BridgeConfig;
pub use error::{BackendError, Result};
pub use history::ConversationStore;
pub use session::{ChatSession, TurnContext};
