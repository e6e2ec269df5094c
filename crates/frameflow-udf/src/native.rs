//! Dynamic-library UDF back-end.
//!
//! Libraries are discovered on the `LD_LIBRARY_PATH` search path under the
//! platform naming convention (`lib<name>.so`, `<name>.dll`), opened lazily,
//! and driven through the C ABI in [`crate::abi`].

use std::env;
use std::ffi::{CStr, CString, OsStr};
use std::os::raw::{c_char, c_void};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use frameflow_core::{Frame, FrameView, PixelBacking};

use crate::abi::{self, InitializeUdf, NativeUdfInstance, RawImage};
use crate::handle::Verdict;

#[cfg(unix)]
use libloading::os::unix::{Library, RTLD_LAZY};
#[cfg(not(unix))]
use libloading::Library;

const SEARCH_PATH_ENV: &str = "LD_LIBRARY_PATH";

/// UDF loaded from a shared library.
pub struct NativeUdf {
    instance: NonNull<NativeUdfInstance>,
    // Keeps the library mapped for the instance and for any output buffers it
    // handed out; declared after `instance` so it is dropped last.
    library: Arc<Library>,
}

// The ABI requires instances to be reentrant; the manager shares handles
// across workers without a per-handle lock.
unsafe impl Send for NativeUdf {}
unsafe impl Sync for NativeUdf {}

impl NativeUdf {
    /// Locate the library for `name` on the search path, open it, and build
    /// the UDF instance through `initialize_udf`.
    pub fn load(name: &str, config: &Map<String, Value>) -> Result<Self> {
        let search = env::var_os(SEARCH_PATH_ENV)
            .ok_or_else(|| anyhow!("{SEARCH_PATH_ENV} is not set"))?;
        let path = locate_library(name, &search).ok_or_else(|| {
            anyhow!("no library named {:?} on {SEARCH_PATH_ENV}", libloading::library_filename(name))
        })?;
        debug!("Found native UDF {name:?} at {}", path.display());

        #[cfg(unix)]
        let library = unsafe { Library::open(Some(&path), RTLD_LAZY) }
            .with_context(|| format!("opening {}", path.display()))?;
        #[cfg(not(unix))]
        let library = unsafe { Library::new(&path) }
            .with_context(|| format!("opening {}", path.display()))?;

        let config_json = CString::new(serde_json::to_string(config)?)
            .context("UDF configuration contains a NUL byte")?;

        let instance = {
            let initialize = unsafe { library.get::<InitializeUdf>(abi::INITIALIZE_SYMBOL) }
                .context("resolving initialize_udf symbol")?;
            unsafe { initialize(config_json.as_ptr()) }
        };
        let instance = NonNull::new(instance)
            .ok_or_else(|| anyhow!("initialize_udf returned null for UDF {name:?}"))?;

        debug!("Initialized native UDF {name:?}");
        Ok(Self {
            instance,
            library: Arc::new(library),
        })
    }

    /// Run the UDF on view 0 of the frame.
    ///
    /// Follows the matrix contract: the UDF receives the frame's pixels and
    /// an empty output; if it fills the output with a distinct buffer, that
    /// buffer becomes the new view 0 and its release goes back through the
    /// library's `free_buffer`.
    pub fn process(&self, frame: &mut Frame) -> Verdict {
        let (data_ptr, data_len, width, height, channels) = {
            let geometry = (frame.width(0), frame.height(0), frame.channels(0));
            let ((Ok(width), Ok(height), Ok(channels)), Ok(data)) = (geometry, frame.data(0))
            else {
                error!("native UDF invoked on a frame without a readable view 0");
                return Verdict::Error;
            };
            (data.as_ptr() as *mut u8, data.len(), width, height, channels)
        };

        let meta_json = match serde_json::to_string(frame.metadata())
            .map_err(anyhow::Error::from)
            .and_then(|s| CString::new(s).map_err(anyhow::Error::from))
        {
            Ok(json) => json,
            Err(err) => {
                error!("failed to marshal frame metadata for native UDF: {err}");
                return Verdict::Error;
            }
        };

        let input = RawImage {
            data: data_ptr,
            len: data_len,
            width,
            height,
            channels,
        };
        let mut output = RawImage::empty();
        let mut meta_out: *mut c_char = ptr::null_mut();

        let inst = unsafe { self.instance.as_ref() };
        let code =
            unsafe { (inst.process)(inst.ctx, &input, &mut output, meta_json.as_ptr(), &mut meta_out) };

        if !meta_out.is_null() {
            let replacement = unsafe { CStr::from_ptr(meta_out) }
                .to_str()
                .ok()
                .and_then(|s| serde_json::from_str::<Map<String, Value>>(s).ok());
            unsafe { (inst.free_string)(inst.ctx, meta_out) };
            match replacement {
                Some(meta) => *frame.metadata_mut() = meta,
                None => warn!("native UDF returned unparseable metadata; keeping previous envelope"),
            }
        }

        // A distinct, non-empty output buffer replaces view 0. Pointing the
        // output at the input means the frame was not actually modified.
        if !output.data.is_null() && output.data != data_ptr {
            if output.len == 0 || output.width <= 0 || output.height <= 0 || output.channels <= 0 {
                warn!("native UDF produced an output with invalid geometry; ignoring it");
                unsafe { (inst.free_buffer)(inst.ctx, output.data, output.len) };
            } else {
                let backing = NativeBuffer {
                    data: output.data,
                    len: output.len,
                    ctx: inst.ctx,
                    free: inst.free_buffer,
                    _library: self.library.clone(),
                };
                let view = FrameView::external(
                    Box::new(backing),
                    output.width,
                    output.height,
                    output.channels,
                );
                if let Err(err) = frame.set_data(0, view) {
                    error!("failed to install native UDF output: {err}");
                    return Verdict::Error;
                }
            }
        }

        match Verdict::from_code(code as i64) {
            Some(Verdict::Error) => {
                error!("error in native UDF process()");
                Verdict::Error
            }
            Some(verdict) => verdict,
            None => {
                error!("native UDF returned unknown verdict code {code}");
                Verdict::Error
            }
        }
    }
}

impl Drop for NativeUdf {
    fn drop(&mut self) {
        debug!("Destroying native UDF");
        // Instance first; its function pointers live in the library, which
        // the Arc keeps mapped until every outstanding buffer is released.
        unsafe { ((*self.instance.as_ptr()).destroy)(self.instance.as_ptr()) };
    }
}

/// Pixel buffer allocated by a native UDF. Releasing it calls back into the
/// library, so the backing pins the library mapping.
struct NativeBuffer {
    data: *mut u8,
    len: usize,
    ctx: *mut c_void,
    free: unsafe extern "C" fn(*mut c_void, *mut u8, usize),
    _library: Arc<Library>,
}

// The buffer is exclusively owned and `free_buffer` is reentrant per the ABI.
unsafe impl Send for NativeBuffer {}

impl PixelBacking for NativeBuffer {
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        unsafe { (self.free)(self.ctx, self.data, self.len) };
    }
}

/// Probe each search-path directory for the platform library name.
pub(crate) fn locate_library(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    let file_name = libloading::library_filename(name);
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn locate_library_probes_directories_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let file_name = libloading::library_filename("resize");
        fs::write(second.path().join(&file_name), b"not a real library").unwrap();

        let search = env::join_paths([first.path(), second.path()]).unwrap();
        let found = locate_library("resize", &search).unwrap();
        assert_eq!(found, second.path().join(&file_name));
    }

    #[test]
    fn locate_library_returns_none_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let search = env::join_paths([dir.path()]).unwrap();
        assert!(locate_library("missing_udf", &search).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn locate_library_skips_empty_path_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = libloading::library_filename("edge");
        fs::write(dir.path().join(&file_name), b"stub").unwrap();

        let mut search = std::ffi::OsString::from(":");
        search.push(dir.path());
        assert!(locate_library("edge", &search).is_some());
    }

    #[test]
    fn loading_a_non_library_file_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = libloading::library_filename("bogus");
        fs::write(dir.path().join(&file_name), b"definitely not ELF").unwrap();

        let search = env::join_paths([dir.path()]).unwrap();
        let path = locate_library("bogus", &search).unwrap();
        #[cfg(unix)]
        let result = unsafe { Library::open(Some(&path), RTLD_LAZY) };
        #[cfg(not(unix))]
        let result = unsafe { Library::new(&path) };
        assert!(result.is_err());
    }
}
