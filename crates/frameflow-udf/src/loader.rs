//! Back-end resolution for named UDFs.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::builtin;
use crate::handle::{BackendKind, UdfBackend, UdfHandle};
use crate::native::NativeUdf;
#[cfg(feature = "python")]
use crate::python::PythonUdf;

/// Fixed probe order when the config does not pin a back-end.
const PROBE_ORDER: [BackendKind; 3] = [BackendKind::Builtin, BackendKind::Native, BackendKind::Python];

/// Stateless factory resolving UDF names to loaded handles.
///
/// Back-ends are tried in a fixed order (builtin, native shared library,
/// embedded Python module); the first whose initialization succeeds wins. A
/// `type` key in the UDF config pins a single back-end. Constructing a loader
/// also performs the one-shot, process-wide interpreter initialization.
#[derive(Default)]
pub struct UdfLoader;

impl UdfLoader {
    pub fn new() -> Self {
        #[cfg(feature = "python")]
        crate::python::ensure_interpreter();
        Self
    }

    /// Load the UDF named `name`. Fails only when every candidate back-end
    /// fails; the error names each back-end's reason.
    pub fn load(
        &self,
        name: &str,
        config: &Map<String, Value>,
        max_workers: usize,
    ) -> Result<UdfHandle> {
        let pinned = match config.get("type") {
            None => None,
            Some(value) => Some(
                serde_json::from_value::<BackendKind>(value.clone())
                    .map_err(|_| anyhow::anyhow!("invalid UDF type {value} for {name:?}"))?,
            ),
        };

        let candidates: &[BackendKind] = match &pinned {
            Some(kind) => std::slice::from_ref(kind),
            None => &PROBE_ORDER,
        };

        let mut failures = Vec::with_capacity(candidates.len());
        for kind in candidates {
            match try_backend(*kind, name, config) {
                Ok(backend) => {
                    debug!("Loaded UDF {name:?} via the {kind:?} back-end");
                    return Ok(UdfHandle::new(name.to_string(), max_workers, backend));
                }
                Err(err) => failures.push(format!("{kind:?}: {err:#}")),
            }
        }

        bail!("no back-end could load UDF {name:?} ({})", failures.join("; "));
    }
}

fn try_backend(kind: BackendKind, name: &str, config: &Map<String, Value>) -> Result<UdfBackend> {
    match kind {
        BackendKind::Builtin => Ok(UdfBackend::Builtin(builtin::instantiate(name, config)?)),
        BackendKind::Native => Ok(UdfBackend::Native(NativeUdf::load(name, config)?)),
        #[cfg(feature = "python")]
        BackendKind::Python => Ok(UdfBackend::Python(PythonUdf::load(name, config)?)),
        #[cfg(not(feature = "python"))]
        BackendKind::Python => {
            let _ = (name, config);
            bail!("embedded python back-end not compiled in (enable the `python` feature)")
        }
    }
}

#[cfg(test)]
mod tests {
    use frameflow_core::{Frame, FrameView};

    use super::*;
    use crate::builtin::BuiltinUdf;
    use crate::handle::Verdict;

    #[test]
    fn unknown_udf_reports_every_backend_failure() {
        let loader = UdfLoader::new();
        let err = loader
            .load("loader_test_missing", &Map::new(), 1)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("loader_test_missing"));
        assert!(message.contains("Builtin"));
        assert!(message.contains("Native"));
        assert!(message.contains("Python"));
    }

    #[test]
    fn builtin_backend_wins_when_registered() {
        crate::builtin::register("loader_test_identity", |_config: &Map<String, Value>| {
            Ok(Box::new(|_frame: &mut Frame| Verdict::Ok) as Box<dyn BuiltinUdf>)
        });

        let loader = UdfLoader::new();
        let mut handle = loader
            .load("loader_test_identity", &Map::new(), 2)
            .unwrap();
        assert_eq!(handle.name(), "loader_test_identity");
        assert_eq!(handle.max_workers(), 2);
        assert_eq!(handle.backend_kind(), BackendKind::Builtin);
        assert_eq!(handle.prof_entry_key(), "");

        handle.set_prof_entry_key("k_entry");
        handle.set_prof_exit_key("k_exit");
        assert_eq!(handle.prof_entry_key(), "k_entry");
        assert_eq!(handle.prof_exit_key(), "k_exit");

        let mut frame = Frame::new(FrameView::owned(vec![0; 4], 2, 2, 1));
        assert_eq!(handle.process(&mut frame), Verdict::Ok);
    }

    #[test]
    fn pinned_type_skips_other_backends() {
        crate::builtin::register("loader_test_pinned", |_config: &Map<String, Value>| {
            Ok(Box::new(|_frame: &mut Frame| Verdict::Ok) as Box<dyn BuiltinUdf>)
        });

        let mut config = Map::new();
        config.insert("type".into(), Value::from("native"));
        let loader = UdfLoader::new();
        // A registered builtin must not satisfy a config pinned to native.
        let err = loader.load("loader_test_pinned", &config, 1).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Native"));
        assert!(!message.contains("Builtin:"));
    }

    #[test]
    fn invalid_type_value_is_rejected() {
        let mut config = Map::new();
        config.insert("type".into(), Value::from("fortran"));
        let loader = UdfLoader::new();
        let err = loader.load("whatever", &config, 1).unwrap_err();
        assert!(err.to_string().contains("invalid UDF type"));
    }
}
