//! Safe RAII wrapper around `llama_context`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::LlamaBatch;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// Owns a `llama_context` pointer and its parent model reference.
pub struct LlamaContext {
    ptr: *mut llama_sys::llama_context,
    /// Keep the model alive for the lifetime of the context.
    model: Arc<LlamaModel>,
}

// Safety: all mutation goes through &mut self; the embedding application
// guarantees single-threaded access per session.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    /// Create a new inference context.
    pub fn new(model: Arc<LlamaModel>, params: &ContextParams) -> Result<Self> {
        let mut raw = unsafe { llama_sys::llama_context_default_params() };
        raw.n_ctx = params.n_ctx;
        raw.n_batch = params.n_batch;
        raw.n_threads = params.n_threads;
        raw.n_threads_batch = params.n_threads_batch;

        let ctx = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), raw) };
        if ctx.is_null() {
            return Err(LlamaError::ContextCreationFailed(
                "llama_init_from_model returned null".into(),
            ));
        }

        debug!(n_ctx = params.n_ctx, "Context created");
        Ok(Self { ptr: ctx, model })
    }

    //  Accessors

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_context {
        self.ptr
    }

    pub fn model(&self) -> &LlamaModel {
        &self.model
    }

    pub fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.ptr) }
    }

    pub fn n_batch(&self) -> u32 {
        unsafe { llama_sys::llama_n_batch(self.ptr) }
    }

    //  Core operations

    /// Decode (process) a batch of tokens.
    pub fn decode(&mut self, batch: &mut LlamaBatch) -> Result<()> {
        let rc = unsafe { llama_sys::llama_decode(self.ptr, batch.raw()) };
        if rc != 0 {
            return Err(LlamaError::DecodeFailed(rc));
        }
        Ok(())
    }

    /// Drop all cached KV state.
    pub fn kv_cache_clear(&mut self) {
        unsafe {
            let mem = llama_sys::llama_get_memory(self.ptr);
            if !mem.is_null() {
                llama_sys::llama_memory_clear(mem, false);
            }
        }
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama context");
            unsafe { llama_sys::llama_free(self.ptr) }
        }
    }
}

//  ContextParams

/// Context creation parameters. The defaults are the fixed configuration
/// the mobile shell runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    #[serde(default = "default_n_batch")]
    pub n_batch: u32,
    #[serde(default = "default_n_threads")]
    pub n_threads: i32,
    #[serde(default = "default_n_threads")]
    pub n_threads_batch: i32,
}

fn default_n_ctx() -> u32 {
    2048
}
fn default_n_batch() -> u32 {
    512
}
fn default_n_threads() -> i32 {
    4
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: default_n_ctx(),
            n_batch: default_n_batch(),
            n_threads: default_n_threads(),
            n_threads_batch: default_n_threads(),
        }
    }
}
