//! Timestamp annotations for tracing frames through the UDF chain.

use std::sync::OnceLock;
use std::time::Instant;

use serde_json::{Map, Value};

const PROFILING_ENV: &str = "PROFILING_MODE";

/// Optional sink that stamps monotonic timestamps into frame metadata.
///
/// When disabled, [`annotate`](Profiling::annotate) is a no-op. The number of
/// keys written per frame is bounded by the manager: two per UDF plus the two
/// output-queue markers.
#[derive(Debug, Clone, Copy)]
pub struct Profiling {
    enabled: bool,
}

impl Profiling {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Read the process-wide `PROFILING_MODE` toggle.
    pub fn from_env() -> Self {
        let enabled = std::env::var(PROFILING_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on"))
            .unwrap_or(false);
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write the current monotonic timestamp (nanoseconds since a
    /// process-stable anchor) under `key`.
    pub fn annotate(&self, meta: &mut Map<String, Value>, key: &str) {
        if self.enabled {
            meta.insert(key.to_string(), Value::from(monotonic_ns()));
        }
    }
}

fn monotonic_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
