//! The session: one loaded model paired with one generation context.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::BackendGuard;
use crate::batch::LlamaBatch;
use crate::config::SessionConfig;
use crate::context::LlamaContext;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;
use crate::sampler::SamplerChain;
use crate::token;

/// Exclusive owner of a loaded model, its generation context, and one
/// reference to the process-wide backend.
///
/// A `Session` value is always fully initialized: construction either
/// yields a ready session or releases everything it had already acquired
/// and returns the error. There is no partially-constructed state.
pub struct Session {
    // Drop order is load-bearing: the context goes first (releasing the
    // model when its Arc count reaches zero), then the sampler, then the
    // backend reference.
    context: LlamaContext,
    sampler: SamplerChain,
    _backend: BackendGuard,
    path: PathBuf,
    config: SessionConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("n_ctx", &self.config.context.n_ctx)
            .field("max_tokens", &self.config.max_tokens)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Load the model at `path` and prepare a generation context.
    ///
    /// Fails before touching the backend if `path` is empty or does not
    /// name a readable regular file. Any failure after backend
    /// acquisition unwinds whatever was already acquired.
    pub fn open(path: impl AsRef<Path>, config: SessionConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(LlamaError::InvalidArgument("empty model path".into()));
        }
        let meta = std::fs::metadata(path).map_err(|e| LlamaError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !meta.is_file() {
            return Err(LlamaError::ModelLoadFailed {
                path: path.display().to_string(),
                reason: "not a regular file".into(),
            });
        }

        // Acquisition order: backend, model, context. Errors propagate
        // through `?`, dropping the locals acquired so far in reverse.
        let backend = BackendGuard::acquire();
        let model = Arc::new(LlamaModel::load_from_file(path, &config.model)?);
        let context = LlamaContext::new(Arc::clone(&model), &config.context)?;
        let sampler = config.sampling.to_chain();

        info!(path = %path.display(), n_ctx = config.context.n_ctx, "Session ready");
        Ok(Self {
            context,
            sampler,
            _backend: backend,
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn model_path(&self) -> &Path {
        &self.path
    }

    //  Text generation

    /// Generate a completion for `prompt`, decoding one token at a time
    /// until the end-of-sequence marker or the token budget is reached.
    ///
    /// `max_tokens` of `None` uses the session default. Each call is
    /// independent: the KV cache is cleared on entry.
    ///
    /// A decode failure before anything was generated is an error; a
    /// decode failure after at least one appended token truncates and
    /// returns the partial text as success. Callers observe the second
    /// behavior, so it is kept even though it swallows the error.
    pub fn generate(&mut self, prompt: &str, max_tokens: Option<u32>) -> Result<String> {
        let budget = max_tokens.unwrap_or(self.config.max_tokens);

        self.context.kv_cache_clear();

        let vocab = self.context.model().vocab();
        let tokens = token::tokenize(vocab, prompt, true, false)?;
        if tokens.is_empty() {
            return Err(LlamaError::TokenizationFailed(
                "prompt produced no tokens".into(),
            ));
        }
        debug!(prompt_tokens = tokens.len(), budget, "Starting generation");

        let eos = self.context.model().token_eos();
        let eot = self.context.model().token_eot();

        //  Prompt processing: one batch, logits on the last position.
        let mut batch = LlamaBatch::prompt(&tokens);
        self.context.decode(&mut batch)?;

        let mut n_cur = tokens.len() as i32;
        let mut text = String::new();
        let mut appended = 0u32;

        //  Token generation loop
        while appended < budget {
            let new_token = self.sampler.sample(&self.context, batch.n_tokens() - 1);

            if new_token == eos || new_token == eot {
                debug!(appended, "End-of-sequence reached");
                break;
            }

            text.push_str(&token::token_to_piece(vocab, new_token));
            appended += 1;

            batch.refill(new_token, n_cur);
            n_cur += 1;

            if let Err(e) = self.context.decode(&mut batch) {
                warn!(error = %e, appended, "Decode failed mid-generation; truncating");
                break;
            }
        }

        debug!(appended, chars = text.len(), "Generation finished");
        Ok(text)
    }

    //  Metadata query

    /// Human-readable session summary, read from cached configuration
    /// only — no engine call.
    pub fn model_info(&self) -> String {
        let mut info = String::new();
        let _ = writeln!(info, "Model: {}", self.path.display());
        let _ = writeln!(info, "Context size: {}", self.config.context.n_ctx);
        let _ = writeln!(info, "Batch size: {}", self.config.context.n_batch);
        let _ = writeln!(info, "Threads: {}", self.config.context.n_threads);
        info
    }
}
