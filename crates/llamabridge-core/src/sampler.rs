//! Sampler chain construction and token sampling.

use serde::{Deserialize, Serialize};

use crate::context::LlamaContext;

/// RAII wrapper around a `llama_sampler` chain.
pub struct SamplerChain {
    ptr: *mut llama_sys::llama_sampler,
}

unsafe impl Send for SamplerChain {}

impl SamplerChain {
    /// Create an empty sampler chain.
    pub fn new(no_perf: bool) -> Self {
        let params = llama_sys::llama_sampler_chain_params { no_perf };
        let ptr = unsafe { llama_sys::llama_sampler_chain_init(params) };
        Self { ptr }
    }

    //  Sampler primitives

    pub fn add_greedy(&mut self) {
        unsafe {
            llama_sys::llama_sampler_chain_add(self.ptr, llama_sys::llama_sampler_init_greedy())
        }
    }

    pub fn add_dist(&mut self, seed: u32) {
        unsafe {
            llama_sys::llama_sampler_chain_add(self.ptr, llama_sys::llama_sampler_init_dist(seed))
        }
    }

    pub fn add_temp(&mut self, t: f32) {
        unsafe {
            llama_sys::llama_sampler_chain_add(self.ptr, llama_sys::llama_sampler_init_temp(t))
        }
    }

    pub fn add_top_p(&mut self, p: f32, min_keep: usize) {
        unsafe {
            llama_sys::llama_sampler_chain_add(
                self.ptr,
                llama_sys::llama_sampler_init_top_p(p, min_keep),
            )
        }
    }

    //  Sampling

    /// Sample the next token from the model output at position `idx`.
    pub fn sample(&mut self, ctx: &LlamaContext, idx: i32) -> i32 {
        unsafe { llama_sys::llama_sampler_sample(self.ptr, ctx.as_ptr(), idx) }
    }
}

impl Drop for SamplerChain {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { llama_sys::llama_sampler_free(self.ptr) }
        }
    }
}

//  SamplingParams

/// Sampling configuration. Fixed per session; the defaults are the
/// configuration the mobile shell runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub seed: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Build and return a ready-to-use [`SamplerChain`].
    ///
    /// Logits are shaped by temperature scaling first, then top-p
    /// filtering, then the final distribution draw. `temperature <= 0`
    /// selects greedy sampling instead.
    pub fn to_chain(&self) -> SamplerChain {
        let mut chain = SamplerChain::new(true);

        if self.temperature > 0.0 {
            chain.add_temp(self.temperature);
            if self.top_p < 1.0 {
                chain.add_top_p(self.top_p, 1);
            }
            chain.add_dist(self.seed.unwrap_or(0));
        } else {
            chain.add_greedy();
        }

        chain
    }
}
