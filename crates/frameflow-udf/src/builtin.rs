//! In-process UDFs compiled into the host binary.
//!
//! Hosts that link their transforms statically register a factory under a
//! name; the loader resolves builtins before probing shared libraries or
//! interpreter modules. Registration is process-wide, mirroring the dynamic
//! back-ends' global discovery.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{bail, Result};
use serde_json::{Map, Value};

use frameflow_core::Frame;

use crate::handle::Verdict;

/// Per-frame transform compiled into the host binary.
pub trait BuiltinUdf: Send + Sync {
    fn process(&self, frame: &mut Frame) -> Verdict;
}

impl fmt::Debug for dyn BuiltinUdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BuiltinUdf")
    }
}

impl<F> BuiltinUdf for F
where
    F: Fn(&mut Frame) -> Verdict + Send + Sync,
{
    fn process(&self, frame: &mut Frame) -> Verdict {
        self(frame)
    }
}

type BuiltinFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn BuiltinUdf>> + Send + Sync>;

fn registry() -> &'static Mutex<HashMap<String, BuiltinFactory>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, BuiltinFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a builtin under `name`. The factory receives the UDF's config
/// object; a later registration under the same name replaces the earlier one.
pub fn register<F>(name: impl Into<String>, factory: F)
where
    F: Fn(&Map<String, Value>) -> Result<Box<dyn BuiltinUdf>> + Send + Sync + 'static,
{
    registry()
        .lock()
        .expect("builtin UDF registry poisoned")
        .insert(name.into(), Arc::new(factory));
}

pub(crate) fn instantiate(name: &str, config: &Map<String, Value>) -> Result<Box<dyn BuiltinUdf>> {
    let factory = registry()
        .lock()
        .expect("builtin UDF registry poisoned")
        .get(name)
        .cloned();
    match factory {
        Some(factory) => factory(config),
        None => bail!("no builtin UDF registered under {name:?}"),
    }
}
