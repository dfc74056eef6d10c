//! Process-wide llama.cpp backend lifecycle.

use std::ffi::CStr;
use std::sync::Mutex;

use tracing::{debug, info};

static BACKEND_REFS: Mutex<usize> = Mutex::new(0);

/// Reference-counted guard for the process-wide llama.cpp backend.
///
/// The first live guard initializes the C backend and bridges its log
/// stream into `tracing`; dropping the last live guard frees it. Every
/// session holds one guard, so any number of sessions may coexist over
/// the process lifetime without unbalancing the init/free pair.
pub struct BackendGuard {
    _private: (),
}

impl BackendGuard {
    pub fn acquire() -> Self {
        let mut refs = BACKEND_REFS.lock().unwrap_or_else(|e| e.into_inner());
        if *refs == 0 {
            unsafe {
                llama_sys::llama_backend_init();
            }
            install_log_bridge();
            info!("llama backend initialized");
            debug!(system = %Self::system_info(), "Engine build");
        }
        *refs += 1;
        Self { _private: () }
    }

    /// Return a human-readable system information string.
    pub fn system_info() -> String {
        unsafe {
            CStr::from_ptr(llama_sys::llama_print_system_info())
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        let mut refs = BACKEND_REFS.lock().unwrap_or_else(|e| e.into_inner());
        *refs -= 1;
        if *refs == 0 {
            unsafe {
                llama_sys::llama_backend_free();
            }
            debug!("llama backend freed");
        }
    }
}

/// Bridge llama.cpp's log stream to the Rust `tracing` subsystem.
fn install_log_bridge() {
    unsafe extern "C" fn cb(
        level: llama_sys::ggml_log_level,
        text: *const std::ffi::c_char,
        _user_data: *mut std::ffi::c_void,
    ) {
        if text.is_null() {
            return;
        }
        let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
        let msg = msg.trim();
        if msg.is_empty() {
            return;
        }
        // ggml_log_level: DEBUG=1, INFO=2, WARN=3, ERROR=4
        match level {
            4 => tracing::error!(target: "llama.cpp", "{msg}"),
            3 => tracing::warn!(target: "llama.cpp", "{msg}"),
            2 => tracing::info!(target: "llama.cpp", "{msg}"),
            _ => tracing::debug!(target: "llama.cpp", "{msg}"),
        }
    }

    unsafe {
        llama_sys::llama_log_set(Some(cb), std::ptr::null_mut());
    }
    debug!("llama.cpp log callback installed");
}
