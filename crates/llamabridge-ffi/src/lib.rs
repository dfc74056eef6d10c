//! C ABI surface consumed by the mobile application shell.
//!
//! Every failure crosses the boundary as a null pointer; no call ever
//! unwinds into the caller. Strings returned by this library are owned by
//! the caller and must be released exactly once via
//! [`llamabridge_free_string`]. Sessions are single-consumer: the shell
//! must not call into one session from two threads at once.
//!
//! The matching C header lives at `include/llamabridge.h`.

use std::ffi::{CStr, CString, c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use llamabridge_core::{Session, SessionConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Opaque session handle as seen by the C caller.
pub struct LlamabridgeSession {
    inner: Session,
}

static INIT_LOGGING: Once = Once::new();

/// Install the tracing subscriber on first entry into the library.
/// `try_init` tolerates a subscriber already installed by the host.
fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,llamabridge=debug")),
            )
            .try_init();
    });
}

/// Run `f` with panics contained; a caught panic logs and yields
/// `fallback` instead of unwinding across the boundary.
fn guarded<T>(what: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v,
        Err(_) => {
            error!("Panic caught at FFI boundary in {what}");
            fallback
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn into_owned_c_string(s: String) -> *mut c_char {
    // Interior NULs cannot cross the boundary; strip them rather than
    // truncating the result.
    let cleaned = if s.contains('\0') {
        s.replace('\0', "")
    } else {
        s
    };
    match CString::new(cleaned) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Initialize a session with the default configuration.
///
/// Equivalent to `llamabridge_init_with_config(model_path, NULL)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_init(model_path: *const c_char) -> *mut LlamabridgeSession {
    unsafe { llamabridge_init_with_config(model_path, std::ptr::null()) }
}

/// Initialize a session, optionally overriding the default configuration
/// with a JSON document. A null `config_json` means "all defaults"; a
/// present but malformed document fails initialization.
///
/// Returns an opaque handle, or null on any failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_init_with_config(
    model_path: *const c_char,
    config_json: *const c_char,
) -> *mut LlamabridgeSession {
    init_logging();
    guarded("llamabridge_init", std::ptr::null_mut(), || {
        let Some(path) = (unsafe { c_str(model_path) }) else {
            return std::ptr::null_mut();
        };
        let config = if config_json.is_null() {
            SessionConfig::default()
        } else {
            let Some(json) = (unsafe { c_str(config_json) }) else {
                return std::ptr::null_mut();
            };
            match serde_json::from_str(json) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(error = %e, "Malformed session config");
                    return std::ptr::null_mut();
                }
            }
        };
        match Session::open(path, config) {
            Ok(inner) => Box::into_raw(Box::new(LlamabridgeSession { inner })),
            Err(e) => {
                error!(error = %e, "Session init failed");
                std::ptr::null_mut()
            }
        }
    })
}

/// Generate a completion for `prompt`. `max_tokens <= 0` means "use the
/// session default".
///
/// Returns a caller-owned string (release via
/// [`llamabridge_free_string`]), or null on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_generate_text(
    session: *mut LlamabridgeSession,
    prompt: *const c_char,
    max_tokens: c_int,
) -> *mut c_char {
    init_logging();
    guarded("llamabridge_generate_text", std::ptr::null_mut(), || {
        if session.is_null() {
            return std::ptr::null_mut();
        }
        let Some(prompt) = (unsafe { c_str(prompt) }) else {
            return std::ptr::null_mut();
        };
        let session = unsafe { &mut (*session).inner };
        let budget = (max_tokens > 0).then_some(max_tokens as u32);
        match session.generate(prompt, budget) {
            Ok(text) => into_owned_c_string(text),
            Err(e) => {
                error!(error = %e, "Generation failed");
                std::ptr::null_mut()
            }
        }
    })
}

/// Human-readable model summary (path, context size, batch size, threads).
///
/// Returns a caller-owned string, or null for an invalid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_model_info(
    session: *const LlamabridgeSession,
) -> *mut c_char {
    init_logging();
    guarded("llamabridge_model_info", std::ptr::null_mut(), || {
        if session.is_null() {
            return std::ptr::null_mut();
        }
        let session = unsafe { &(*session).inner };
        into_owned_c_string(session.model_info())
    })
}

/// True for a live session handle, false for null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_is_valid(session: *const LlamabridgeSession) -> bool {
    !session.is_null()
}

/// Release a session: context, model, then the process-wide backend
/// reference. Safe on null. Calling twice on the same non-null handle is
/// undefined, matching the single-owner contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_free(session: *mut LlamabridgeSession) {
    if session.is_null() {
        return;
    }
    guarded("llamabridge_free", (), || {
        drop(unsafe { Box::from_raw(session) });
    });
}

/// Release a string previously returned by this library. Safe on null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llamabridge_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(s) });
}

/// Library version as a static string; must not be freed.
#[unsafe(no_mangle)]
pub extern "C" fn llamabridge_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}
