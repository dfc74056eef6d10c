//! Tokenization helpers over the engine's vocabulary.

use std::ffi::CString;

use crate::error::{LlamaError, Result};

/// Tokenize `text` using the model's vocabulary.
///
/// Follows the engine's two-call contract: a first call with a null
/// buffer reports the required capacity as a negative count, the second
/// call fills the buffer.
pub fn tokenize(
    vocab: *const llama_sys::llama_vocab,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> Result<Vec<i32>> {
    let c_text = CString::new(text)
        .map_err(|_| LlamaError::TokenizationFailed("text contains null byte".into()))?;

    let query = unsafe {
        llama_sys::llama_tokenize(
            vocab,
            c_text.as_ptr(),
            text.len() as i32,
            std::ptr::null_mut(),
            0,
            add_special,
            parse_special,
        )
    };

    let mut tokens = vec![0i32; query.unsigned_abs() as usize];
    let written = unsafe {
        llama_sys::llama_tokenize(
            vocab,
            c_text.as_ptr(),
            text.len() as i32,
            tokens.as_mut_ptr(),
            tokens.len() as i32,
            add_special,
            parse_special,
        )
    };

    if written < 0 {
        return Err(LlamaError::TokenizationFailed(format!(
            "llama_tokenize returned {written}"
        )));
    }

    tokens.truncate(written as usize);
    Ok(tokens)
}

/// Convert a single token id to its text piece.
///
/// A negative return is the engine asking for a bigger buffer; one resize
/// must satisfy it, so anything but success on the second pass maps to an
/// empty piece.
pub fn token_to_piece(vocab: *const llama_sys::llama_vocab, token: i32) -> String {
    let mut buf = vec![0u8; 64];
    for _ in 0..2 {
        let len = unsafe {
            llama_sys::llama_token_to_piece(
                vocab,
                token,
                buf.as_mut_ptr() as *mut std::ffi::c_char,
                buf.len() as i32,
                0,     // lstrip
                false, // special
            )
        };
        if len >= 0 {
            buf.truncate(len as usize);
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.resize(len.unsigned_abs() as usize, 0);
    }
    String::new()
}
