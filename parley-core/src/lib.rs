pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod inference;
pub mod models;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::ParleyConfig;
pub use error::{ParleyError, ServiceError};
pub use identity::{HttpIdentityProvider, IdentityError, IdentityProvider};
pub use inference::{
    Completion, CompletionRequest, InferenceError, InferenceProvider, MessageContent,
    MistralClient, MistralConfig, PromptMessage, PromptRole,
};
pub use store::{InMemoryStore, PgStore, Store, StoreError};
