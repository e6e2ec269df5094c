//! Uniform contract for loaded UDFs.

use std::fmt;

use serde::Deserialize;

use frameflow_core::Frame;

use crate::builtin::BuiltinUdf;
use crate::native::NativeUdf;
#[cfg(feature = "python")]
use crate::python::PythonUdf;

/// Four-valued result of a UDF's `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// The UDF replaced or mutated the frame's pixels. Equivalent to [`Ok`]
    /// for the pipeline; kept as a tracing hint.
    ///
    /// [`Ok`]: Verdict::Ok
    FrameModified,
    /// Discard the frame silently.
    Drop,
    /// Discard the frame and log a processing failure.
    Error,
}

impl Verdict {
    /// Whether the frame survives this verdict.
    pub fn keeps_frame(self) -> bool {
        matches!(self, Verdict::Ok | Verdict::FrameModified)
    }

    /// Map a wire code, as returned over the C ABI or by a script.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Verdict::Ok),
            1 => Some(Verdict::FrameModified),
            2 => Some(Verdict::Drop),
            3 => Some(Verdict::Error),
            _ => None,
        }
    }
}

/// Back-end selector; the `type` config key pins one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Builtin,
    Native,
    Python,
}

pub(crate) enum UdfBackend {
    Builtin(Box<dyn BuiltinUdf>),
    Native(NativeUdf),
    #[cfg(feature = "python")]
    Python(PythonUdf),
}

/// A loaded UDF: its back-end state, name, worker hint, and profiling keys.
///
/// Handles may be shared across manager workers, so `process` takes `&self`
/// and every back-end is required to be reentrant. The profiling keys are
/// assigned by the manager before the handle is shared.
pub struct UdfHandle {
    name: String,
    max_workers: usize,
    prof_entry_key: String,
    prof_exit_key: String,
    backend: UdfBackend,
}

impl fmt::Debug for UdfHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfHandle")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("prof_entry_key", &self.prof_entry_key)
            .field("prof_exit_key", &self.prof_exit_key)
            .field("backend_kind", &self.backend_kind())
            .finish()
    }
}

impl UdfHandle {
    pub(crate) fn new(name: String, max_workers: usize, backend: UdfBackend) -> Self {
        Self {
            name,
            max_workers,
            prof_entry_key: String::new(),
            prof_exit_key: String::new(),
            backend,
        }
    }

    /// Run the UDF on a frame.
    pub fn process(&self, frame: &mut Frame) -> Verdict {
        match &self.backend {
            UdfBackend::Builtin(udf) => udf.process(frame),
            UdfBackend::Native(udf) => udf.process(frame),
            #[cfg(feature = "python")]
            UdfBackend::Python(udf) => udf.process(frame),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn backend_kind(&self) -> BackendKind {
        match &self.backend {
            UdfBackend::Builtin(_) => BackendKind::Builtin,
            UdfBackend::Native(_) => BackendKind::Native,
            #[cfg(feature = "python")]
            UdfBackend::Python(_) => BackendKind::Python,
        }
    }

    pub fn prof_entry_key(&self) -> &str {
        &self.prof_entry_key
    }

    pub fn set_prof_entry_key(&mut self, key: impl Into<String>) {
        self.prof_entry_key = key.into();
    }

    pub fn prof_exit_key(&self) -> &str {
        &self.prof_exit_key
    }

    pub fn set_prof_exit_key(&mut self, key: impl Into<String>) {
        self.prof_exit_key = key.into();
    }
}
