//! Safe RAII wrapper around `llama_model`.

use std::ffi::CString;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LlamaError, Result};

/// Owns a `llama_model` pointer and frees it on drop.
pub struct LlamaModel {
    ptr: *mut llama_sys::llama_model,
}

// Safety: llama_model is internally read-only after creation.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    /// Load a GGUF model from `path`.
    pub fn load_from_file(path: &Path, params: &ModelParams) -> Result<Self> {
        let path_str = path.to_str().ok_or_else(|| LlamaError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: "Invalid UTF-8 in path".into(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| LlamaError::ModelLoadFailed {
            path: path_str.into(),
            reason: "Path contains null byte".into(),
        })?;

        let mut raw = unsafe { llama_sys::llama_model_default_params() };
        raw.n_gpu_layers = params.n_gpu_layers;
        raw.use_mmap = params.use_mmap;
        raw.use_mlock = params.use_mlock;

        info!(path = %path.display(), "Loading model…");
        let model = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), raw) };

        if model.is_null() {
            return Err(LlamaError::ModelLoadFailed {
                path: path_str.into(),
                reason: "llama_model_load_from_file returned null".into(),
            });
        }

        info!(path = %path.display(), "Model loaded");
        Ok(Self { ptr: model })
    }

    //  Accessors

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.ptr
    }

    /// Vocabulary handle (valid for the lifetime of the model).
    pub fn vocab(&self) -> *const llama_sys::llama_vocab {
        unsafe { llama_sys::llama_model_get_vocab(self.ptr) }
    }

    pub fn n_vocab(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_n_tokens(self.vocab()) }
    }

    pub fn token_eos(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_eos(self.vocab()) }
    }

    pub fn token_eot(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_eot(self.vocab()) }
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama model");
            unsafe { llama_sys::llama_model_free(self.ptr) }
        }
    }
}

//  ModelParams

/// Parameters for [`LlamaModel::load_from_file`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Layers to offload to GPU. -1 = all.
    #[serde(default = "default_n_gpu_layers")]
    pub n_gpu_layers: i32,
    /// Use memory-mapped I/O.
    #[serde(default = "default_use_mmap")]
    pub use_mmap: bool,
    /// Lock model memory (prevent swapping).
    #[serde(default)]
    pub use_mlock: bool,
}

fn default_n_gpu_layers() -> i32 {
    -1
}
fn default_use_mmap() -> bool {
    true
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: default_n_gpu_layers(),
            use_mmap: default_use_mmap(),
            use_mlock: false,
        }
    }
}
