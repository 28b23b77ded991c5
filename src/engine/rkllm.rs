//! FFI binding to the vendor NPU runtime (`librkllmrt.so`)
//!
//! The runtime registers one callback at init time and passes an opaque
//! `userdata` pointer back into it during `rkllm_run`. That pointer carries the
//! [`TokenSink`] of the current run, so no process-wide state is involved.

#![allow(non_camel_case_types)]

use super::{
    CallEvent, EngineConfig, EngineLoader, InferenceEngine, RawOutput, TokenLogprob, TokenSink,
};
use crate::error::{Error, Result};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

type LLMHandle = *mut c_void;

// Callback states
const LLM_RUN_NORMAL: c_int = 0;
const LLM_RUN_FINISH: c_int = 1;

#[repr(C)]
struct RKLLMToken {
    logprob: f32,
    id: i32,
}

#[repr(C)]
struct RKLLMResult {
    text: *const c_char,
    tokens: *const RKLLMToken,
    num: i32,
}

#[repr(C)]
struct RKLLMParam {
    model_path: *const c_char,
    num_npu_core: i32,
    max_context_len: i32,
    max_new_tokens: i32,
    top_k: i32,
    top_p: f32,
    temperature: f32,
    repeat_penalty: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    mirostat: i32,
    mirostat_tau: f32,
    mirostat_eta: f32,
    logprobs: bool,
    top_logprobs: i32,
    use_gpu: bool,
}

type LLMResultCallback = extern "C" fn(*mut RKLLMResult, *mut c_void, c_int);

#[link(name = "rkllmrt")]
extern "C" {
    fn rkllm_init(handle: *mut LLMHandle, param: *mut RKLLMParam, callback: LLMResultCallback) -> c_int;
    fn rkllm_run(handle: LLMHandle, prompt: *const c_char, userdata: *mut c_void) -> c_int;
    fn rkllm_destroy(handle: LLMHandle) -> c_int;
}

extern "C" fn on_result(result: *mut RKLLMResult, userdata: *mut c_void, state: c_int) {
    if userdata.is_null() {
        return;
    }
    // Unwinding into the runtime is undefined behaviour
    let _ = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: userdata is the `&mut &mut dyn TokenSink` passed to rkllm_run,
        // alive for the duration of that call.
        let sink = unsafe { &mut **(userdata as *mut &mut dyn TokenSink) };
        let event = match state {
            LLM_RUN_NORMAL => CallEvent::Token(unsafe { read_result(result) }),
            LLM_RUN_FINISH => CallEvent::Finished,
            _ => CallEvent::Error,
        };
        sink.on_event(event);
    }));
}

/// SAFETY: `result` must be null or point to a valid RKLLMResult for the
/// duration of the callback.
unsafe fn read_result(result: *mut RKLLMResult) -> RawOutput {
    let Some(result) = result.as_ref() else {
        return RawOutput::default();
    };
    let bytes = if result.text.is_null() {
        Vec::new()
    } else {
        CStr::from_ptr(result.text).to_bytes().to_vec()
    };
    let tokens = if result.tokens.is_null() || result.num <= 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(result.tokens, result.num as usize)
            .iter()
            .map(|t| TokenLogprob {
                id: t.id,
                logprob: t.logprob,
            })
            .collect()
    };
    RawOutput { bytes, tokens }
}

/// Loader for the native runtime
pub struct RkllmLoader;

impl EngineLoader for RkllmLoader {
    fn init(&self, config: &EngineConfig) -> Result<Box<dyn InferenceEngine>> {
        let model_path = CString::new(config.model_path.to_string_lossy().into_owned())
            .map_err(|e| Error::EngineInit(format!("invalid model path: {}", e)))?;

        let mut param = RKLLMParam {
            model_path: model_path.as_ptr(),
            num_npu_core: config.npu_cores as i32,
            max_context_len: config.max_context_len as i32,
            max_new_tokens: config.max_new_tokens as i32,
            top_k: config.sampling.top_k,
            top_p: config.sampling.top_p,
            temperature: config.sampling.temperature,
            repeat_penalty: config.sampling.repeat_penalty,
            frequency_penalty: config.sampling.frequency_penalty,
            presence_penalty: config.sampling.presence_penalty,
            mirostat: config.sampling.mirostat,
            mirostat_tau: config.sampling.mirostat_tau,
            mirostat_eta: config.sampling.mirostat_eta,
            logprobs: config.logprobs,
            top_logprobs: config.top_logprobs as i32,
            use_gpu: config.use_gpu,
        };

        let mut handle: LLMHandle = std::ptr::null_mut();
        // SAFETY: param and model_path outlive the call; handle is an out-pointer.
        let ret = unsafe { rkllm_init(&mut handle, &mut param, on_result) };
        if ret != 0 || handle.is_null() {
            return Err(Error::EngineInit(format!(
                "rkllm_init returned {} for {}",
                ret,
                config.model_path.display()
            )));
        }

        tracing::info!(
            "RKLLM engine initialized ({} NPU cores, context {})",
            config.npu_cores,
            config.max_context_len
        );
        Ok(Box::new(RkllmEngine {
            handle,
            _model_path: model_path,
        }))
    }

    fn backend(&self) -> &'static str {
        "rkllm"
    }
}

/// Initialized runtime handle
pub struct RkllmEngine {
    handle: LLMHandle,
    _model_path: CString,
}

// SAFETY: the handle is only used by one thread at a time; the single-slot
// gate and the worker's mutex serialize every call.
unsafe impl Send for RkllmEngine {}

impl InferenceEngine for RkllmEngine {
    fn run(&mut self, prompt: &str, sink: &mut dyn TokenSink) -> Result<()> {
        let prompt = CString::new(prompt)
            .map_err(|e| Error::EngineRun(format!("prompt contains NUL byte: {}", e)))?;

        let mut sink_ref: &mut dyn TokenSink = sink;
        let userdata = &mut sink_ref as *mut &mut dyn TokenSink as *mut c_void;

        // SAFETY: handle is live until Drop; userdata outlives the call.
        let ret = unsafe { rkllm_run(self.handle, prompt.as_ptr(), userdata) };
        if ret != 0 {
            return Err(Error::EngineRun(format!("rkllm_run returned {}", ret)));
        }
        Ok(())
    }
}

impl Drop for RkllmEngine {
    fn drop(&mut self) {
        // SAFETY: handle came from rkllm_init and is destroyed exactly once.
        let ret = unsafe { rkllm_destroy(self.handle) };
        if ret != 0 {
            tracing::warn!("rkllm_destroy returned {}", ret);
        } else {
            tracing::info!("RKLLM engine released");
        }
    }
}
