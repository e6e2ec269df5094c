//! The UDF manager: loads the configured chain and drives it from a worker
//! pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, info};

use frameflow_core::{EncodeType, Frame, FrameQueue, Profiling, PushOutcome};
use frameflow_udf::{UdfHandle, UdfLoader, Verdict};

use crate::config::ManagerConfig;
use crate::executor::ThreadExecutor;

/// How often a waiting worker re-checks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Bytes of randomness in each profiling key nonce.
const PROF_NONCE_LEN: usize = 5;

/// Orchestrates the UDF chain over a fixed worker pool.
///
/// Construction loads every configured UDF (fatal on failure) and spawns the
/// workers; [`stop`](UdfManager::stop) shuts the pool down cooperatively, and
/// dropping the manager drains both queues so no frame leaks.
pub struct UdfManager {
    ctx: Arc<WorkerContext>,
    executor: ThreadExecutor,
}

impl fmt::Debug for UdfManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfManager").finish_non_exhaustive()
    }
}

struct WorkerContext {
    handles: Vec<UdfHandle>,
    input: Arc<FrameQueue>,
    output: Arc<FrameQueue>,
    profile: Profiling,
    enc_type: EncodeType,
    enc_level: i32,
    push_entry_key: String,
    push_block_key: String,
}

impl UdfManager {
    /// Construct from a raw JSON config. Profiling is governed by the
    /// process-wide `PROFILING_MODE` toggle.
    pub fn new(
        config: Value,
        input: Arc<FrameQueue>,
        output: Arc<FrameQueue>,
        service_name: impl Into<String>,
        enc_type: EncodeType,
        enc_level: i32,
    ) -> Result<Self> {
        Self::with_profiling(
            config,
            input,
            output,
            service_name,
            enc_type,
            enc_level,
            Profiling::from_env(),
        )
    }

    /// Construct with an explicit profiling hook.
    pub fn with_profiling(
        config: Value,
        input: Arc<FrameQueue>,
        output: Arc<FrameQueue>,
        service_name: impl Into<String>,
        enc_type: EncodeType,
        enc_level: i32,
        profile: Profiling,
    ) -> Result<Self> {
        let config = ManagerConfig::from_value(config)?;
        let service_name = service_name.into();
        info!("max_workers: {}", config.max_workers);

        let loader = UdfLoader::new();
        let mut handles = Vec::with_capacity(config.udfs.len());
        for (index, entry) in config.udfs.iter().enumerate() {
            debug!("Loading UDF {:?}", entry.name);
            let mut handle = loader
                .load(&entry.name, &entry.config, 1)
                .with_context(|| format!("loading UDF {:?}", entry.name))?;

            if profile.is_enabled() {
                let nonce = prof_nonce();
                let first = if index == 0 { "_first" } else { "" };
                handle.set_prof_entry_key(format!(
                    "{}_{}_{}{}_entry",
                    entry.name, nonce, service_name, first
                ));
                handle.set_prof_exit_key(format!(
                    "{}_{}_{}{}_exit",
                    entry.name, nonce, service_name, first
                ));
            }
            handles.push(handle);
        }

        let ctx = Arc::new(WorkerContext {
            handles,
            input,
            output,
            profile,
            enc_type,
            enc_level,
            push_entry_key: format!("{service_name}_UDF_output_queue_ts"),
            push_block_key: format!("{service_name}_UDF_output_queue_blocked_ts"),
        });

        let worker_ctx = ctx.clone();
        let executor = ThreadExecutor::new(config.max_workers, move |worker_id, stop| {
            run_worker(worker_id, stop, &worker_ctx)
        });

        Ok(Self { ctx, executor })
    }

    /// Number of UDFs in the chain.
    pub fn udf_count(&self) -> usize {
        self.ctx.handles.len()
    }

    /// Metadata key stamped when a processed frame enters the output queue.
    pub fn push_entry_key(&self) -> &str {
        &self.ctx.push_entry_key
    }

    /// Metadata key stamped when the output queue blocked the worker.
    pub fn push_block_key(&self) -> &str {
        &self.ctx.push_block_key
    }

    /// Signal the workers to stop and join them. Idempotent; in-flight UDF
    /// calls run to completion, and closing the queues wakes any worker
    /// blocked in a wait.
    pub fn stop(&mut self) {
        self.executor.request_stop();
        self.ctx.input.close();
        self.ctx.output.close();
        self.executor.stop();
    }
}

impl Drop for UdfManager {
    fn drop(&mut self) {
        self.stop();
        // Drain the input queue first: no worker is left to consume it, so
        // anything still queued would leak its buffers otherwise.
        debug!("Clearing UDF input queue");
        while self.ctx.input.try_pop().is_some() {}
        debug!("Clearing UDF output queue");
        while self.ctx.output.try_pop().is_some() {}
    }
}

fn prof_nonce() -> String {
    let mut rng = rand::rng();
    (0..PROF_NONCE_LEN)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect()
}

fn run_worker(worker_id: usize, stop: &AtomicBool, ctx: &WorkerContext) {
    info!("UDF worker {worker_id} started");

    while !stop.load(Ordering::Relaxed) {
        if !ctx.input.wait_for(STOP_POLL_INTERVAL) {
            continue;
        }
        // Another worker may have raced us to the frame.
        let Some(frame) = ctx.input.try_pop() else {
            continue;
        };
        metrics::gauge!("udf_queue_depth", "queue" => "input").set(ctx.input.len() as f64);
        process_one(ctx, frame);
    }

    info!("UDF worker {worker_id} stopped");
}

/// Apply the chain to one frame and publish it if it survives.
fn process_one(ctx: &WorkerContext, frame: Frame) {
    let chain_start = Instant::now();
    let mut frame = frame;

    // Advertise the manager's target encoding; the transcode itself is
    // deferred to the serialization commit point.
    let matches_target = frame.encoding(0).map(|e| e == ctx.enc_type).unwrap_or(false)
        && frame.encode_level(0).map(|l| l == ctx.enc_level).unwrap_or(false);
    if !matches_target {
        if let Err(err) = frame.set_encoding(0, ctx.enc_type, ctx.enc_level) {
            error!("set_encoding failed: {err}");
        }
    }

    let mut slot = Some(frame);
    let mut verdict = Verdict::Ok;
    for handle in &ctx.handles {
        let Some(frame) = slot.as_mut() else { break };

        debug!("Running UDF {:?}", handle.name());
        ctx.profile.annotate(frame.metadata_mut(), handle.prof_entry_key());
        verdict = handle.process(frame);
        ctx.profile.annotate(frame.metadata_mut(), handle.prof_exit_key());

        match verdict {
            Verdict::Ok | Verdict::FrameModified => {}
            Verdict::Drop => {
                debug!("UDF {:?} dropped the frame", handle.name());
                metrics::counter!("udf_frames_dropped_total", "reason" => "drop").increment(1);
                slot = None;
            }
            Verdict::Error => {
                error!("UDF {:?} failed to process frame", handle.name());
                metrics::counter!("udf_process_errors_total").increment(1);
                slot = None;
            }
        }
    }

    if let Some(mut frame) = slot {
        if verdict.keeps_frame() {
            ctx.profile.annotate(frame.metadata_mut(), &ctx.push_entry_key);
            match ctx.output.push(frame) {
                PushOutcome::Ok => {}
                PushOutcome::Full(mut frame) => {
                    // Blocked on downstream; mark the frame and wait for room.
                    ctx.profile.annotate(frame.metadata_mut(), &ctx.push_block_key);
                    match ctx.output.push_wait(frame) {
                        PushOutcome::Ok => {}
                        PushOutcome::Full(_) | PushOutcome::Closed(_) => {
                            error!("Failed to enqueue processed frame, frame dropped");
                            metrics::counter!("udf_frames_dropped_total", "reason" => "backpressure")
                                .increment(1);
                        }
                    }
                }
                PushOutcome::Closed(_) => {
                    debug!("Output queue closed, dropping processed frame");
                }
            }
            metrics::gauge!("udf_queue_depth", "queue" => "output").set(ctx.output.len() as f64);
        }
    }

    metrics::histogram!("udf_chain_latency_seconds").record(chain_start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn construction_fails_on_malformed_config() {
        let input = Arc::new(FrameQueue::unbounded());
        let output = Arc::new(FrameQueue::unbounded());
        let result = UdfManager::new(
            json!({ "max_workers": 1 }),
            input,
            output,
            "svc",
            EncodeType::None,
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn construction_fails_when_a_udf_cannot_load() {
        let input = Arc::new(FrameQueue::unbounded());
        let output = Arc::new(FrameQueue::unbounded());
        let err = UdfManager::new(
            json!({ "udfs": [{ "name": "manager_test_nonexistent" }], "max_workers": 1 }),
            input,
            output,
            "svc",
            EncodeType::None,
            0,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("manager_test_nonexistent"));
    }

    #[test]
    fn profiling_keys_follow_the_service_naming() {
        let input = Arc::new(FrameQueue::unbounded());
        let output = Arc::new(FrameQueue::unbounded());
        let manager = UdfManager::new(
            json!({ "udfs": [], "max_workers": 1 }),
            input,
            output,
            "ingest",
            EncodeType::None,
            0,
        )
        .unwrap();
        assert_eq!(manager.push_entry_key(), "ingest_UDF_output_queue_ts");
        assert_eq!(manager.push_block_key(), "ingest_UDF_output_queue_blocked_ts");
        assert_eq!(manager.udf_count(), 0);
    }

    #[test]
    fn prof_nonce_is_hex_of_expected_width() {
        let nonce = prof_nonce();
        assert_eq!(nonce.len(), PROF_NONCE_LEN * 2);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stop_is_idempotent() {
        let input = Arc::new(FrameQueue::unbounded());
        let output = Arc::new(FrameQueue::unbounded());
        let mut manager = UdfManager::new(
            json!({ "udfs": [], "max_workers": 2 }),
            input,
            output,
            "svc",
            EncodeType::None,
            0,
        )
        .unwrap();
        manager.stop();
        manager.stop();
    }
}
