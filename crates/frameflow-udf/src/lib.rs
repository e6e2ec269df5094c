//! Pluggable per-frame transforms (UDFs) for the frameflow pipeline.
//!
//! A UDF is discovered by name and exposes one contract: `process(frame)`
//! returning a [`Verdict`]. Three back-ends provide that contract — builtins
//! compiled into the host binary, native shared libraries resolved along the
//! library search path, and (behind the `python` feature) modules run by an
//! embedded Python interpreter. [`UdfLoader`] tries them in that order and
//! returns the first that initializes.

pub mod abi;
pub mod builtin;
mod handle;
mod loader;
mod native;
#[cfg(feature = "python")]
mod python;

pub use builtin::BuiltinUdf;
pub use handle::{BackendKind, UdfHandle, Verdict};
pub use loader::UdfLoader;
pub use native::NativeUdf;
#[cfg(feature = "python")]
pub use python::PythonUdf;
