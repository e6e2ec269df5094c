//! Minimal driver: one builtin UDF, one frame through the chain, then the
//! serialization path a bus publisher would take.
//!
//! Run with `cargo run -p frameflow-manager --example load_frames`.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use frameflow_core::{EncodeType, Frame, FrameError, FrameQueue, FrameView};
use frameflow_manager::UdfManager;
use frameflow_udf::{builtin, BuiltinUdf, Verdict};

fn invert_view(frame: &mut Frame) -> Result<(), FrameError> {
    let inverted: Vec<u8> = frame.data(0)?.iter().map(|b| !b).collect();
    let (w, h, c) = (frame.width(0)?, frame.height(0)?, frame.channels(0)?);
    frame.set_data(0, FrameView::owned(inverted, w, h, c))
}

fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    // A host-registered UDF: invert every pixel.
    builtin::register("invert", |_config: &Map<String, Value>| {
        Ok(Box::new(|frame: &mut Frame| match invert_view(frame) {
            Ok(()) => Verdict::FrameModified,
            Err(_) => Verdict::Error,
        }) as Box<dyn BuiltinUdf>)
    });

    let input = Arc::new(FrameQueue::unbounded());
    let output = Arc::new(FrameQueue::unbounded());

    let mut manager = UdfManager::new(
        json!({ "udfs": [{ "name": "invert" }], "max_workers": 1 }),
        input.clone(),
        output.clone(),
        "load-example",
        EncodeType::Jpeg,
        50,
    )?;

    // A synthetic 64x64 RGB gradient stands in for a decoded camera frame.
    let (width, height, channels) = (64, 64, 3);
    let pixels: Vec<u8> = (0..width * height * channels).map(|i| (i % 256) as u8).collect();
    let mut frame = Frame::new(FrameView::owned(pixels, width as i32, height as i32, channels as i32));
    frame.metadata_mut().insert("camera".into(), Value::from("synthetic-0"));
    assert!(input.push(frame).is_ok());

    let processed = output.pop().expect("pipeline shut down before producing a frame");
    println!(
        "processed frame: {}x{}x{} ({} bytes, target encoding {:?})",
        processed.width(0)?,
        processed.height(0)?,
        processed.channels(0)?,
        processed.data(0)?.len(),
        processed.encoding(0)?,
    );

    // The bus path: serialization commits the JPEG encode and re-homes the
    // pixel buffer onto the envelope.
    let envelope = processed.serialize()?;
    println!(
        "envelope: {} blob(s), first blob {} bytes, metadata keys: {:?}",
        envelope.blob_count(),
        envelope.blob(0).map(|b| b.len()).unwrap_or(0),
        envelope.metadata().keys().collect::<Vec<_>>(),
    );

    manager.stop();
    Ok(())
}
