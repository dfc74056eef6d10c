//! Deterministic in-process fake of the llama.cpp C API subset this
//! workspace calls.
//!
//! The vocabulary has 256 tokens where token id = byte value (BOS = 1,
//! EOS = 2, no EOT). The model is an *echo model*: after a prompt batch is
//! decoded, successive samples replay the prompt's non-special tokens in
//! order, then EOS. The real tokenize → decode → sample → piece pipeline
//! runs against it; nothing is canned.
//!
//! [`testing`] exposes resource counters and one-shot failure injection.

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};

pub type llama_token = i32;
pub type llama_pos = i32;
pub type llama_seq_id = i32;
pub type ggml_log_level = i32;
pub type ggml_log_callback =
    Option<unsafe extern "C" fn(ggml_log_level, *const c_char, *mut c_void)>;

const N_VOCAB: i32 = 256;
const TOKEN_BOS: llama_token = 1;
const TOKEN_EOS: llama_token = 2;
const TOKEN_EOT: llama_token = -1;

// ── Counters & failure injection ──────────────────────────────────────

static BACKEND_INITS: AtomicUsize = AtomicUsize::new(0);
static BACKEND_FREES: AtomicUsize = AtomicUsize::new(0);
static LIVE_MODELS: AtomicUsize = AtomicUsize::new(0);
static LIVE_CONTEXTS: AtomicUsize = AtomicUsize::new(0);
static LIVE_SAMPLERS: AtomicUsize = AtomicUsize::new(0);
static LIVE_BATCHES: AtomicUsize = AtomicUsize::new(0);

static FAIL_NEXT_CONTEXT: AtomicBool = AtomicBool::new(false);
/// 0 = disabled; n = fail the n-th decode call since the last KV clear.
static FAIL_DECODE_AT: AtomicU32 = AtomicU32::new(0);

// ── Backend ───────────────────────────────────────────────────────────

pub unsafe extern "C" fn llama_backend_init() {
    BACKEND_INITS.fetch_add(1, Ordering::SeqCst);
}

pub unsafe extern "C" fn llama_backend_free() {
    BACKEND_FREES.fetch_add(1, Ordering::SeqCst);
}

pub unsafe extern "C" fn llama_log_set(cb: ggml_log_callback, user_data: *mut c_void) {
    // The stub engine emits no log lines; accept and ignore the sink.
    let _ = (cb, user_data);
}

pub unsafe extern "C" fn llama_print_system_info() -> *const c_char {
    c"stub engine (no native llama.cpp linked)".as_ptr()
}

// ── Model ─────────────────────────────────────────────────────────────

pub struct llama_model {
    #[allow(dead_code)]
    path: PathBuf,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct llama_model_params {
    pub n_gpu_layers: i32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

pub unsafe extern "C" fn llama_model_default_params() -> llama_model_params {
    llama_model_params {
        n_gpu_layers: 0,
        use_mmap: true,
        use_mlock: false,
    }
}

pub unsafe extern "C" fn llama_model_load_from_file(
    path_model: *const c_char,
    _params: llama_model_params,
) -> *mut llama_model {
    if path_model.is_null() {
        return std::ptr::null_mut();
    }
    let path = match unsafe { CStr::from_ptr(path_model) }.to_str() {
        Ok(s) => PathBuf::from(s),
        Err(_) => return std::ptr::null_mut(),
    };
    // Loading succeeds iff the path names a readable, non-empty file.
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        _ => return std::ptr::null_mut(),
    }
    LIVE_MODELS.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(llama_model { path }))
}

pub unsafe extern "C" fn llama_model_free(model: *mut llama_model) {
    if !model.is_null() {
        drop(unsafe { Box::from_raw(model) });
        LIVE_MODELS.fetch_sub(1, Ordering::SeqCst);
    }
}

pub unsafe extern "C" fn llama_model_get_vocab(_model: *const llama_model) -> *const llama_vocab {
    &raw const VOCAB
}

// ── Vocabulary ────────────────────────────────────────────────────────

pub struct llama_vocab {
    _unused: [u8; 0],
}
unsafe impl Sync for llama_vocab {}
static VOCAB: llama_vocab = llama_vocab { _unused: [] };

pub unsafe extern "C" fn llama_vocab_n_tokens(_vocab: *const llama_vocab) -> i32 {
    N_VOCAB
}

pub unsafe extern "C" fn llama_vocab_bos(_vocab: *const llama_vocab) -> llama_token {
    TOKEN_BOS
}

pub unsafe extern "C" fn llama_vocab_eos(_vocab: *const llama_vocab) -> llama_token {
    TOKEN_EOS
}

pub unsafe extern "C" fn llama_vocab_eot(_vocab: *const llama_vocab) -> llama_token {
    TOKEN_EOT
}

// ── Tokenization ──────────────────────────────────────────────────────

pub unsafe extern "C" fn llama_tokenize(
    _vocab: *const llama_vocab,
    text: *const c_char,
    text_len: i32,
    tokens: *mut llama_token,
    n_tokens_max: i32,
    add_special: bool,
    _parse_special: bool,
) -> i32 {
    if text.is_null() || text_len < 0 {
        return 0;
    }
    let bytes = unsafe { std::slice::from_raw_parts(text.cast::<u8>(), text_len as usize) };
    let needed = bytes.len() + usize::from(add_special);
    // Two-call contract: a too-small (or null) buffer reports -needed.
    if tokens.is_null() || (n_tokens_max as usize) < needed {
        return -(needed as i32);
    }
    let mut i = 0usize;
    if add_special {
        unsafe { *tokens = TOKEN_BOS };
        i = 1;
    }
    for &b in bytes {
        unsafe { *tokens.add(i) = llama_token::from(b) };
        i += 1;
    }
    needed as i32
}

pub unsafe extern "C" fn llama_token_to_piece(
    _vocab: *const llama_vocab,
    token: llama_token,
    buf: *mut c_char,
    length: i32,
    _lstrip: i32,
    _special: bool,
) -> i32 {
    // Special and out-of-range tokens have an empty piece.
    if !(3..N_VOCAB).contains(&token) {
        return 0;
    }
    if buf.is_null() || length < 1 {
        return -1;
    }
    unsafe { *buf = token as u8 as c_char };
    1
}

// ── Context ───────────────────────────────────────────────────────────

pub struct llama_context {
    n_ctx: u32,
    n_batch: u32,
    /// Non-special tokens decoded since the last KV clear.
    history: Vec<llama_token>,
    /// History length frozen at the first sample after a decode; the echo
    /// replay stops there so fed-back samples do not extend it.
    prompt_len: Option<usize>,
    next: usize,
    decode_calls: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct llama_context_params {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
    pub n_threads_batch: i32,
}

pub unsafe extern "C" fn llama_context_default_params() -> llama_context_params {
    llama_context_params {
        n_ctx: 512,
        n_batch: 2048,
        n_threads: 4,
        n_threads_batch: 4,
    }
}

pub unsafe extern "C" fn llama_init_from_model(
    model: *mut llama_model,
    params: llama_context_params,
) -> *mut llama_context {
    if model.is_null() {
        return std::ptr::null_mut();
    }
    if FAIL_NEXT_CONTEXT.swap(false, Ordering::SeqCst) {
        return std::ptr::null_mut();
    }
    LIVE_CONTEXTS.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(llama_context {
        n_ctx: params.n_ctx,
        n_batch: params.n_batch,
        history: Vec::new(),
        prompt_len: None,
        next: 0,
        decode_calls: 0,
    }))
}

pub unsafe extern "C" fn llama_free(ctx: *mut llama_context) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx) });
        LIVE_CONTEXTS.fetch_sub(1, Ordering::SeqCst);
    }
}

pub unsafe extern "C" fn llama_n_ctx(ctx: *const llama_context) -> u32 {
    unsafe { (*ctx).n_ctx }
}

pub unsafe extern "C" fn llama_n_batch(ctx: *const llama_context) -> u32 {
    unsafe { (*ctx).n_batch }
}

pub unsafe extern "C" fn llama_decode(ctx: *mut llama_context, batch: llama_batch) -> i32 {
    let ctx = unsafe { &mut *ctx };
    ctx.decode_calls += 1;
    let fail_at = FAIL_DECODE_AT.load(Ordering::SeqCst);
    if fail_at != 0 && ctx.decode_calls == fail_at {
        FAIL_DECODE_AT.store(0, Ordering::SeqCst);
        return 1;
    }
    for i in 0..batch.n_tokens as usize {
        let tok = unsafe { *batch.token.add(i) };
        if (3..N_VOCAB).contains(&tok) {
            ctx.history.push(tok);
        }
    }
    0
}

// ── Memory (KV cache) ─────────────────────────────────────────────────

pub struct llama_memory_i {
    _unused: [u8; 0],
}
pub type llama_memory_t = *mut llama_memory_i;

pub unsafe extern "C" fn llama_get_memory(ctx: *mut llama_context) -> llama_memory_t {
    ctx.cast()
}

pub unsafe extern "C" fn llama_memory_clear(mem: llama_memory_t, _data: bool) {
    if mem.is_null() {
        return;
    }
    let ctx = unsafe { &mut *mem.cast::<llama_context>() };
    ctx.history.clear();
    ctx.prompt_len = None;
    ctx.next = 0;
    ctx.decode_calls = 0;
}

// ── Batch ─────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Clone, Copy)]
pub struct llama_batch {
    pub n_tokens: i32,
    pub token: *mut llama_token,
    pub embd: *mut f32,
    pub pos: *mut llama_pos,
    pub n_seq_id: *mut i32,
    pub seq_id: *mut *mut llama_seq_id,
    pub logits: *mut i8,
}

/// Backing storage for a live batch, keyed by its token-array address.
struct BatchAlloc {
    token: Vec<llama_token>,
    pos: Vec<llama_pos>,
    n_seq_id: Vec<i32>,
    rows: Vec<Vec<llama_seq_id>>,
    row_ptrs: Vec<*mut llama_seq_id>,
    logits: Vec<i8>,
}
unsafe impl Send for BatchAlloc {}

static BATCHES: LazyLock<Mutex<HashMap<usize, BatchAlloc>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub unsafe extern "C" fn llama_batch_init(
    n_tokens: i32,
    embd: i32,
    n_seq_max: i32,
) -> llama_batch {
    assert_eq!(embd, 0, "stub engine supports token batches only");
    let n = n_tokens.max(1) as usize;
    let mut alloc = BatchAlloc {
        token: vec![0; n],
        pos: vec![0; n],
        n_seq_id: vec![0; n],
        rows: (0..n).map(|_| vec![0; n_seq_max.max(1) as usize]).collect(),
        row_ptrs: Vec::with_capacity(n),
        logits: vec![0; n],
    };
    for row in &mut alloc.rows {
        alloc.row_ptrs.push(row.as_mut_ptr());
    }
    let batch = llama_batch {
        n_tokens: 0,
        token: alloc.token.as_mut_ptr(),
        embd: std::ptr::null_mut(),
        pos: alloc.pos.as_mut_ptr(),
        n_seq_id: alloc.n_seq_id.as_mut_ptr(),
        seq_id: alloc.row_ptrs.as_mut_ptr(),
        logits: alloc.logits.as_mut_ptr(),
    };
    let key = batch.token as usize;
    BATCHES
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key, alloc);
    LIVE_BATCHES.fetch_add(1, Ordering::SeqCst);
    batch
}

pub unsafe extern "C" fn llama_batch_free(batch: llama_batch) {
    if batch.token.is_null() {
        return;
    }
    let removed = BATCHES
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&(batch.token as usize));
    if removed.is_some() {
        LIVE_BATCHES.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Sampler ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
enum Stage {
    Greedy,
    Dist { seed: u32 },
    Temp { t: f32 },
    TopP { p: f32, min_keep: usize },
}

pub struct llama_sampler {
    stages: Vec<Stage>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct llama_sampler_chain_params {
    pub no_perf: bool,
}

pub unsafe extern "C" fn llama_sampler_chain_init(
    _params: llama_sampler_chain_params,
) -> *mut llama_sampler {
    LIVE_SAMPLERS.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(llama_sampler { stages: Vec::new() }))
}

pub unsafe extern "C" fn llama_sampler_chain_add(
    chain: *mut llama_sampler,
    smpl: *mut llama_sampler,
) {
    // The chain takes ownership of the added sampler.
    let added = unsafe { Box::from_raw(smpl) };
    unsafe { (*chain).stages.extend(added.stages) };
}

fn single(stage: Stage) -> *mut llama_sampler {
    Box::into_raw(Box::new(llama_sampler {
        stages: vec![stage],
    }))
}

pub unsafe extern "C" fn llama_sampler_init_greedy() -> *mut llama_sampler {
    single(Stage::Greedy)
}

pub unsafe extern "C" fn llama_sampler_init_dist(seed: u32) -> *mut llama_sampler {
    single(Stage::Dist { seed })
}

pub unsafe extern "C" fn llama_sampler_init_temp(t: f32) -> *mut llama_sampler {
    single(Stage::Temp { t })
}

pub unsafe extern "C" fn llama_sampler_init_top_p(p: f32, min_keep: usize) -> *mut llama_sampler {
    single(Stage::TopP { p, min_keep })
}

pub unsafe extern "C" fn llama_sampler_free(smpl: *mut llama_sampler) {
    if !smpl.is_null() {
        drop(unsafe { Box::from_raw(smpl) });
        LIVE_SAMPLERS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Echo sampling: replay the prompt's non-special tokens, then EOS. The
/// shaping stages are recorded but have no effect on the deterministic
/// replay.
pub unsafe extern "C" fn llama_sampler_sample(
    _smpl: *mut llama_sampler,
    ctx: *mut llama_context,
    _idx: i32,
) -> llama_token {
    let ctx = unsafe { &mut *ctx };
    let prompt_len = *ctx.prompt_len.get_or_insert(ctx.history.len());
    if ctx.next < prompt_len {
        let tok = ctx.history[ctx.next];
        ctx.next += 1;
        tok
    } else {
        TOKEN_EOS
    }
}

// ── Test support ──────────────────────────────────────────────────────

/// Resource counters and failure injection for the stub engine.
///
/// Counter-sensitive tests must serialize themselves; the counters are
/// process-global.
pub mod testing {
    use super::*;

    pub fn backend_inits() -> usize {
        BACKEND_INITS.load(Ordering::SeqCst)
    }

    pub fn backend_frees() -> usize {
        BACKEND_FREES.load(Ordering::SeqCst)
    }

    /// Backend initializations not yet paired with a free.
    pub fn live_backends() -> usize {
        backend_inits() - backend_frees()
    }

    pub fn live_models() -> usize {
        LIVE_MODELS.load(Ordering::SeqCst)
    }

    pub fn live_contexts() -> usize {
        LIVE_CONTEXTS.load(Ordering::SeqCst)
    }

    pub fn live_samplers() -> usize {
        LIVE_SAMPLERS.load(Ordering::SeqCst)
    }

    pub fn live_batches() -> usize {
        LIVE_BATCHES.load(Ordering::SeqCst)
    }

    /// Make the next context creation fail (one-shot).
    pub fn fail_next_context_creation() {
        FAIL_NEXT_CONTEXT.store(true, Ordering::SeqCst);
    }

    /// Make the `n`-th decode call since the last KV clear fail
    /// (one-shot, 1-based).
    pub fn fail_decode_call(n: u32) {
        FAIL_DECODE_AT.store(n, Ordering::SeqCst);
    }

    pub fn reset_failures() {
        FAIL_NEXT_CONTEXT.store(false, Ordering::SeqCst);
        FAIL_DECODE_AT.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"fake weights").unwrap();
        f
    }

    #[test]
    fn tokenize_two_call_contract() {
        let text = c"abc";
        let n = unsafe {
            llama_tokenize(&raw const VOCAB, text.as_ptr(), 3, std::ptr::null_mut(), 0, true, false)
        };
        assert_eq!(n, -4); // BOS + 3 bytes

        let mut tokens = vec![0i32; 4];
        let n = unsafe {
            llama_tokenize(&raw const VOCAB, text.as_ptr(), 3, tokens.as_mut_ptr(), 4, true, false)
        };
        assert_eq!(n, 4);
        assert_eq!(tokens, vec![TOKEN_BOS, 97, 98, 99]);
    }

    #[test]
    fn piece_is_byte_and_specials_are_empty() {
        let mut buf = [0 as c_char; 4];
        let n = unsafe {
            llama_token_to_piece(&raw const VOCAB, 97, buf.as_mut_ptr(), 4, 0, false)
        };
        assert_eq!(n, 1);
        assert_eq!(buf[0] as u8, b'a');

        for special in [0, TOKEN_BOS, TOKEN_EOS] {
            let n = unsafe {
                llama_token_to_piece(&raw const VOCAB, special, buf.as_mut_ptr(), 4, 0, false)
            };
            assert_eq!(n, 0);
        }
    }

    #[test]
    fn batch_alloc_free_bookkeeping() {
        let before = testing::live_batches();
        let batch = unsafe { llama_batch_init(8, 0, 1) };
        assert_eq!(testing::live_batches(), before + 1);
        assert_eq!(batch.n_tokens, 0);
        assert!(!batch.token.is_null());
        unsafe { llama_batch_free(batch) };
        assert_eq!(testing::live_batches(), before);
    }

    #[test]
    fn echo_then_eos() {
        let file = model_file();
        let path = std::ffi::CString::new(file.path().to_str().unwrap()).unwrap();
        let model =
            unsafe { llama_model_load_from_file(path.as_ptr(), llama_model_default_params()) };
        assert!(!model.is_null());
        let ctx = unsafe { llama_init_from_model(model, llama_context_default_params()) };
        assert!(!ctx.is_null());

        // Decode a prompt of [BOS, 'h', 'i'] as one batch.
        let mut batch = unsafe { llama_batch_init(3, 0, 1) };
        for (i, tok) in [TOKEN_BOS, 104, 105].into_iter().enumerate() {
            unsafe {
                *batch.token.add(i) = tok;
                *batch.pos.add(i) = i as i32;
            }
        }
        batch.n_tokens = 3;
        assert_eq!(unsafe { llama_decode(ctx, batch) }, 0);

        // Samples replay 'h', 'i', then EOS — feeding samples back does
        // not extend the replay.
        let smpl = unsafe { llama_sampler_chain_init(llama_sampler_chain_params { no_perf: true }) };
        let t1 = unsafe { llama_sampler_sample(smpl, ctx, -1) };
        assert_eq!(t1, 104);
        batch.n_tokens = 1;
        unsafe { *batch.token = t1 };
        assert_eq!(unsafe { llama_decode(ctx, batch) }, 0);
        assert_eq!(unsafe { llama_sampler_sample(smpl, ctx, -1) }, 105);
        assert_eq!(unsafe { llama_sampler_sample(smpl, ctx, -1) }, TOKEN_EOS);

        unsafe {
            llama_batch_free(batch);
            llama_sampler_free(smpl);
            llama_free(ctx);
            llama_model_free(model);
        }
    }

    #[test]
    fn load_rejects_missing_and_empty_files() {
        let missing = std::ffi::CString::new("/no/such/model.gguf").unwrap();
        let m = unsafe {
            llama_model_load_from_file(missing.as_ptr(), llama_model_default_params())
        };
        assert!(m.is_null());

        let empty = tempfile::NamedTempFile::new().unwrap();
        let path = std::ffi::CString::new(empty.path().to_str().unwrap()).unwrap();
        let m =
            unsafe { llama_model_load_from_file(path.as_ptr(), llama_model_default_params()) };
        assert!(m.is_null());
    }
}
