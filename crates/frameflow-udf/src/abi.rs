//! C ABI shared with native UDF libraries.
//!
//! A native UDF is a shared library exporting one C-linkage symbol,
//! `initialize_udf`, which receives the UDF configuration as a JSON string
//! and returns a [`NativeUdfInstance`] — a plain vtable object, so no Rust or
//! C++ type layout crosses the boundary.
//!
//! Ownership rules:
//! - the instance (and its `ctx`) is released through `destroy`, exactly once;
//! - pixel buffers the UDF stores into `output` are released through
//!   `free_buffer` once the pipeline is done with them, which may be long
//!   after `process` returned;
//! - strings returned through `meta_out` are released through `free_string`
//!   before `process`'s caller returns.
//!
//! `input` is read-only; a UDF that changes the frame allocates a new buffer
//! and describes it in `output`. Returning `output.data == input.data` means
//! "unchanged" and the output is ignored. All function pointers must be
//! reentrant when the manager runs more than one worker.

use std::os::raw::{c_char, c_void};
use std::ptr;

/// Verdict codes understood by [`Verdict::from_code`](crate::Verdict::from_code).
pub const UDF_OK: i32 = 0;
pub const UDF_FRAME_MODIFIED: i32 = 1;
pub const UDF_DROP_FRAME: i32 = 2;
pub const UDF_ERROR: i32 = 3;

/// Entry symbol every native UDF library exports.
pub const INITIALIZE_SYMBOL: &[u8] = b"initialize_udf\0";

/// `initialize_udf(config_json) -> instance`, null on failure.
pub type InitializeUdf = unsafe extern "C" fn(config_json: *const c_char) -> *mut NativeUdfInstance;

/// Borrowed image matrix passed across the boundary: `len` bytes of packed
/// `height × width × channels` pixel data.
#[repr(C)]
pub struct RawImage {
    pub data: *mut u8,
    pub len: usize,
    pub width: i32,
    pub height: i32,
    pub channels: i32,
}

impl RawImage {
    pub(crate) const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            width: 0,
            height: 0,
            channels: 0,
        }
    }
}

/// UDF object returned by `initialize_udf`.
#[repr(C)]
pub struct NativeUdfInstance {
    /// Opaque per-UDF state threaded through every call.
    pub ctx: *mut c_void,
    /// Process one frame; returns a `UDF_*` verdict code. `meta_json` is the
    /// frame's metadata envelope; a replacement envelope may be returned
    /// through `meta_out`.
    pub process: unsafe extern "C" fn(
        ctx: *mut c_void,
        input: *const RawImage,
        output: *mut RawImage,
        meta_json: *const c_char,
        meta_out: *mut *mut c_char,
    ) -> i32,
    /// Release a buffer previously stored into `output`.
    pub free_buffer: unsafe extern "C" fn(ctx: *mut c_void, data: *mut u8, len: usize),
    /// Release a string previously returned through `meta_out`.
    pub free_string: unsafe extern "C" fn(ctx: *mut c_void, string: *mut c_char),
    /// Release the instance itself, including `ctx`.
    pub destroy: unsafe extern "C" fn(instance: *mut NativeUdfInstance),
}
