pub mod auth;
pub mod config;
pub mod conversation;
pub mod models;
pub mod providers;

pub use config::AppConfig;
pub use conversation::{CallContext, ConversationHandler, ResponseStream};
pub use models::{Message, RequestConfig, Role};
pub use providers::error::ProviderError;
pub use providers::{ChatProvider, ProviderKind, ProviderRegistry};
