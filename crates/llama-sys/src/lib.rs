//! Raw FFI bindings to the llama.cpp C API.
//!
//! In the normal build the bindings are generated by `bindgen` against the
//! headers of the linked library. When the `stub` feature is enabled (or no
//! native library is available at build time), a deterministic in-process
//! fake with the same symbols is compiled instead; its test-support API is
//! exported as [`stub`].

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

#[cfg(not(stub_engine))]
include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

#[cfg(stub_engine)]
mod stub_impl;
#[cfg(stub_engine)]
pub use stub_impl::*;
#[cfg(stub_engine)]
pub use stub_impl::testing as stub;
