//! Embedded-interpreter UDF back-end.
//!
//! A Python UDF is a module importable by the UDF name that defines a `Udf`
//! class. The constructor receives the config keys as keyword arguments and
//! `process(frame)` returns a verdict code (`None` counts as OK). The frame
//! argument references the pipeline's pixel buffer without a copy; a UDF that
//! replaces the pixels assigns `frame.new_data`.
//!
//! The interpreter is initialized once per process and never finalized; the
//! GIL serializes calls from concurrent manager workers.

use std::os::raw::c_char;
use std::sync::Once;

use anyhow::{anyhow, Result};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList, PyString};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use frameflow_core::{Frame, FrameView};

use crate::handle::Verdict;

/// Config keys consumed by the loader rather than the UDF constructor.
const RESERVED_KEYS: [&str; 2] = ["name", "type"];

/// Initialize the embedded interpreter exactly once per process. Idempotent.
pub(crate) fn ensure_interpreter() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        debug!("Initializing embedded Python interpreter");
        pyo3::prepare_freethreaded_python();
    });
}

/// Script-side frame wrapper handed to `process`.
///
/// `data` is a read-only memoryview over the pipeline's pixel buffer, valid
/// only for the duration of the call; UDFs must not retain it. Replacement
/// pixels go through `new_data` (bytes-like), with `new_width`/`new_height`/
/// `new_channels` describing changed geometry.
#[pyclass(name = "Frame")]
struct PyFrame {
    #[pyo3(get)]
    width: i32,
    #[pyo3(get)]
    height: i32,
    #[pyo3(get)]
    channels: i32,
    #[pyo3(get)]
    data: Py<PyAny>,
    #[pyo3(get, set)]
    new_data: Option<Py<PyAny>>,
    #[pyo3(get, set)]
    new_width: Option<i32>,
    #[pyo3(get, set)]
    new_height: Option<i32>,
    #[pyo3(get, set)]
    new_channels: Option<i32>,
}

/// UDF backed by a class in an importable Python module.
pub struct PythonUdf {
    process: Py<PyAny>,
}

impl PythonUdf {
    /// Import the module named `name`, construct its `Udf` class with the
    /// config keys as kwargs, and cache the bound `process` callable.
    pub fn load(name: &str, config: &Map<String, Value>) -> Result<Self> {
        ensure_interpreter();
        Python::with_gil(|py| {
            let module = PyModule::import(py, name)
                .map_err(|err| anyhow!("importing module {name:?}: {}", describe(py, &err)))?;
            let class = module
                .getattr("Udf")
                .map_err(|err| anyhow!("module {name:?} exports no Udf class: {}", describe(py, &err)))?;

            let kwargs = PyDict::new(py);
            for (key, value) in config {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                kwargs
                    .set_item(key, json_to_py(py, value)?)
                    .map_err(|err| anyhow!("building kwargs for {name:?}: {}", describe(py, &err)))?;
            }

            let instance = class
                .call((), Some(&kwargs))
                .map_err(|err| anyhow!("constructing Udf for {name:?}: {}", describe(py, &err)))?;
            let process = instance
                .getattr("process")
                .map_err(|err| anyhow!("Udf class for {name:?} has no process method: {}", describe(py, &err)))?;

            debug!("Initialized python UDF {name:?}");
            Ok(Self {
                process: process.unbind(),
            })
        })
    }

    /// Call the script's `process` under the GIL. Script exceptions are
    /// logged with their traceback and converted to [`Verdict::Error`]; they
    /// never propagate.
    pub fn process(&self, frame: &mut Frame) -> Verdict {
        Python::with_gil(|py| match self.invoke(py, frame) {
            Ok(verdict) => verdict,
            Err(err) => {
                error!("python UDF raised: {}", describe(py, &err));
                Verdict::Error
            }
        })
    }

    fn invoke(&self, py: Python<'_>, frame: &mut Frame) -> PyResult<Verdict> {
        use pyo3::exceptions::PyRuntimeError;

        let to_pyerr = |err: frameflow_core::FrameError| PyRuntimeError::new_err(err.to_string());

        let width = frame.width(0).map_err(to_pyerr)?;
        let height = frame.height(0).map_err(to_pyerr)?;
        let channels = frame.channels(0).map_err(to_pyerr)?;
        let (data_ptr, data_len) = {
            let data = frame.data(0).map_err(to_pyerr)?;
            (data.as_ptr(), data.len())
        };

        // SAFETY: the frame outlives this call, the GIL is held, and the
        // wrapper documents that the view must not escape `process`.
        let view = unsafe {
            Bound::from_owned_ptr_or_err(
                py,
                pyo3::ffi::PyMemoryView_FromMemory(
                    data_ptr as *mut c_char,
                    data_len as pyo3::ffi::Py_ssize_t,
                    pyo3::ffi::PyBUF_READ,
                ),
            )?
        };

        let wrapper = Py::new(
            py,
            PyFrame {
                width,
                height,
                channels,
                data: view.unbind(),
                new_data: None,
                new_width: None,
                new_height: None,
                new_channels: None,
            },
        )?;

        let result = self.process.bind(py).call1((wrapper.clone_ref(py),))?;

        let verdict = if result.is_none() {
            Verdict::Ok
        } else {
            match result.extract::<i64>() {
                Ok(code) => Verdict::from_code(code).unwrap_or_else(|| {
                    warn!("python UDF returned unknown verdict code {code}");
                    Verdict::Error
                }),
                Err(_) => {
                    warn!("python UDF returned a non-integer verdict");
                    Verdict::Error
                }
            }
        };

        let guard = wrapper.borrow(py);
        if let Some(new_data) = guard.new_data.as_ref() {
            // Copy the replacement out of the interpreter; dropping the
            // wrapper below releases the script-side buffer reference.
            let bytes: Vec<u8> = new_data.bind(py).extract()?;
            let new_width = guard.new_width.unwrap_or(width);
            let new_height = guard.new_height.unwrap_or(height);
            let new_channels = guard.new_channels.unwrap_or(channels);
            if new_width <= 0 || new_height <= 0 || new_channels <= 0 {
                return Err(PyRuntimeError::new_err("frame.new_* geometry must be positive"));
            }
            frame
                .set_data(0, FrameView::owned(bytes, new_width, new_height, new_channels))
                .map_err(to_pyerr)?;
        }
        drop(guard);

        Ok(verdict)
    }
}

/// Render an error with its traceback for the log.
fn describe(py: Python<'_>, err: &PyErr) -> String {
    match err.traceback(py).and_then(|tb| tb.format().ok()) {
        Some(traceback) => format!("{err}\n{traceback}"),
        None => err.to_string(),
    }
}

fn json_to_py<'py>(py: Python<'py>, value: &Value) -> Result<Bound<'py, PyAny>> {
    let object = match value {
        Value::Null => py.None().into_bound(py),
        Value::Bool(b) => PyBool::new(py, *b).to_owned().into_any(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_pyobject(py)
                    .map_err(|err| anyhow!("converting integer: {err}"))?
                    .into_any()
            } else if let Some(u) = n.as_u64() {
                u.into_pyobject(py)
                    .map_err(|err| anyhow!("converting integer: {err}"))?
                    .into_any()
            } else {
                let f = n.as_f64().unwrap_or_default();
                f.into_pyobject(py)
                    .map_err(|err| anyhow!("converting float: {err}"))?
                    .into_any()
            }
        }
        Value::String(s) => PyString::new(py, s).into_any(),
        Value::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(json_to_py(py, item)?)
                    .map_err(|err| anyhow!("building list: {err}"))?;
            }
            list.into_any()
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, json_to_py(py, item)?)
                    .map_err(|err| anyhow!("building dict: {err}"))?;
            }
            dict.into_any()
        }
    };
    Ok(object)
}
