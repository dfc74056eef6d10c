//! Safe session layer over the llama.cpp C API.
//!
//! Provides RAII-managed types for model loading, context creation,
//! sampling and tokenization, and a [`Session`] that pairs one loaded
//! model with one generation context for the FFI surface above it.

pub mod backend;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod sampler;
pub mod session;
pub mod token;

pub use backend::BackendGuard;
pub use batch::LlamaBatch;
pub use config::SessionConfig;
pub use context::{ContextParams, LlamaContext};
pub use error::{LlamaError, Result};
pub use model::{LlamaModel, ModelParams};
pub use sampler::{SamplerChain, SamplingParams};
pub use session::Session;
pub use token::{token_to_piece, tokenize};
