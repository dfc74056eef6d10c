//! Session lifecycle and generation tests, run against the stub engine.
//!
//! The stub's resource counters are process-global, so every test takes
//! the same lock and measures deltas rather than absolute values.

use std::io::Write as _;
use std::sync::{Mutex, MutexGuard};

use llama_sys::stub;
use llamabridge_core::{LlamaError, Session, SessionConfig};
use tempfile::NamedTempFile;

static LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    stub::reset_failures();
    guard
}

fn model_file() -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(b"stub weights").unwrap();
    f
}

fn open(file: &NamedTempFile) -> Session {
    Session::open(file.path(), SessionConfig::default()).unwrap()
}

//  Lifecycle

#[test]
fn open_then_drop_releases_everything() {
    let _g = lock();
    let file = model_file();
    let models = stub::live_models();
    let contexts = stub::live_contexts();
    let samplers = stub::live_samplers();
    let backends = stub::live_backends();

    let session = open(&file);
    assert_eq!(stub::live_models(), models + 1);
    assert_eq!(stub::live_contexts(), contexts + 1);
    assert_eq!(stub::live_samplers(), samplers + 1);
    assert_eq!(stub::live_backends(), backends + 1);

    drop(session);
    assert_eq!(stub::live_models(), models);
    assert_eq!(stub::live_contexts(), contexts);
    assert_eq!(stub::live_samplers(), samplers);
    assert_eq!(stub::live_backends(), backends);
}

#[test]
fn empty_path_fails_before_any_acquisition() {
    let _g = lock();
    let inits = stub::backend_inits();
    let models = stub::live_models();

    let err = Session::open("", SessionConfig::default()).unwrap_err();
    assert!(matches!(err, LlamaError::InvalidArgument(_)));
    assert_eq!(stub::backend_inits(), inits);
    assert_eq!(stub::live_models(), models);
}

#[test]
fn missing_file_fails_before_any_acquisition() {
    let _g = lock();
    let inits = stub::backend_inits();

    let err = Session::open("/no/such/model.gguf", SessionConfig::default()).unwrap_err();
    assert!(matches!(err, LlamaError::ModelLoadFailed { .. }));
    assert_eq!(stub::backend_inits(), inits);
}

#[test]
fn failed_model_load_rolls_back_backend() {
    let _g = lock();
    // A zero-byte file passes the precheck but is rejected by the engine.
    let file = NamedTempFile::new().unwrap();
    let inits = stub::backend_inits();
    let backends = stub::live_backends();

    let err = Session::open(file.path(), SessionConfig::default()).unwrap_err();
    assert!(matches!(err, LlamaError::ModelLoadFailed { .. }));
    assert_eq!(stub::backend_inits(), inits + 1);
    assert_eq!(stub::live_backends(), backends);
}

#[test]
fn failed_context_creation_releases_model() {
    let _g = lock();
    let file = model_file();
    let models = stub::live_models();
    let contexts = stub::live_contexts();
    let backends = stub::live_backends();

    stub::fail_next_context_creation();
    let err = Session::open(file.path(), SessionConfig::default()).unwrap_err();
    assert!(matches!(err, LlamaError::ContextCreationFailed(_)));
    assert_eq!(stub::live_models(), models);
    assert_eq!(stub::live_contexts(), contexts);
    assert_eq!(stub::live_backends(), backends);
}

#[test]
fn coexisting_sessions_share_one_backend_init() {
    let _g = lock();
    let file_a = model_file();
    let file_b = model_file();
    let inits = stub::backend_inits();
    let backends = stub::live_backends();

    let s1 = open(&file_a);
    let s2 = open(&file_b);
    assert_eq!(stub::backend_inits(), inits + 1);
    assert_eq!(stub::live_backends(), backends + 1);

    drop(s1);
    assert_eq!(stub::live_backends(), backends + 1);
    drop(s2);
    assert_eq!(stub::live_backends(), backends);

    // After full teardown the next session re-initializes.
    let s3 = open(&file_a);
    assert_eq!(stub::backend_inits(), inits + 2);
    drop(s3);
}

//  Generation

#[test]
fn echo_generation_round_trip() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    let out = session.generate("hello", None).unwrap();
    assert_eq!(out, "hello");
}

#[test]
fn budget_caps_appended_tokens() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    let out = session.generate("hello", Some(2)).unwrap();
    assert_eq!(out, "he");
}

#[test]
fn absent_budget_uses_session_default() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    // The echo would reproduce all 150 bytes; the default budget is 100.
    let prompt = "a".repeat(150);
    let out = session.generate(&prompt, None).unwrap();
    assert_eq!(out, "a".repeat(100));
}

#[test]
fn stops_at_end_of_sequence_without_its_text() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    // Budget far above the echo length: generation must end at EOS.
    let out = session.generate("hi", Some(50)).unwrap();
    assert_eq!(out, "hi");
}

#[test]
fn decode_failure_mid_generation_returns_partial_text() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    // Decode call 1 is the prompt; calls 2 and 3 feed back the first two
    // sampled tokens. Failing call 3 truncates after two appended tokens.
    stub::fail_decode_call(3);
    let out = session.generate("abcdef", None).unwrap();
    assert_eq!(out, "ab");
}

#[test]
fn prompt_decode_failure_is_an_error() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    stub::fail_decode_call(1);
    let err = session.generate("abc", None).unwrap_err();
    assert!(matches!(err, LlamaError::DecodeFailed(_)));
}

#[test]
fn consecutive_calls_are_independent() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    assert_eq!(session.generate("one", None).unwrap(), "one");
    assert_eq!(session.generate("two", None).unwrap(), "two");
}

#[test]
fn empty_prompt_generates_empty_text() {
    let _g = lock();
    let file = model_file();
    let mut session = open(&file);
    // "" still tokenizes to [BOS]; the echo has nothing to replay.
    let out = session.generate("", None).unwrap();
    assert_eq!(out, "");
}

#[test]
fn session_debug_names_the_loaded_model() {
    let _g = lock();
    let file = model_file();
    let session = open(&file);
    // `unwrap_err` on `Result<Session>` also relies on this impl.
    let repr = format!("{session:?}");
    assert!(repr.starts_with("Session"));
    assert!(repr.contains(file.path().file_name().unwrap().to_str().unwrap()));
}

//  Metadata

#[test]
fn model_info_reports_path_and_configured_sizes() {
    let _g = lock();
    let file = model_file();
    let session = open(&file);
    let info = session.model_info();
    assert!(info.starts_with("Model: "));
    assert!(info.contains(file.path().to_str().unwrap()));
    assert!(info.contains("Context size: 2048\n"));
    assert!(info.contains("Batch size: 512\n"));
    assert!(info.contains("Threads: 4\n"));
}
