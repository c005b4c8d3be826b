#[cfg(feature = "openai-provider")]
pub mod openai;

#[cfg(feature = "openai-provider")]
pub use openai::{OpenAiConfig, OpenAiProvider};
