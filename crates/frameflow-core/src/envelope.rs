//! Message envelope: the metadata tree plus zero or more pixel blobs.
//!
//! The envelope is the boundary between the pipeline core and the external
//! bus. Its concrete wire encoding belongs to the transport; the core only
//! guarantees the layout of the image keys and the blob order.
//!
//! Layout produced by [`Frame::serialize`]: view 0's fields are promoted to
//! the top-level keys `img_handle`, `width`, `height`, `channels`,
//! `encoding_type`, and `encoding_level`; views 1..n become the
//! `additional_frames` array of objects with the same shape, order preserved,
//! and their payloads become additional blobs.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::codec;
use crate::error::FrameError;
use crate::frame::{EncodeType, Frame, FrameView, ViewBuffer};

pub(crate) const KEY_IMG_HANDLE: &str = "img_handle";
pub(crate) const KEY_WIDTH: &str = "width";
pub(crate) const KEY_HEIGHT: &str = "height";
pub(crate) const KEY_CHANNELS: &str = "channels";
pub(crate) const KEY_ENCODING_TYPE: &str = "encoding_type";
pub(crate) const KEY_ENCODING_LEVEL: &str = "encoding_level";
pub(crate) const KEY_ADDITIONAL_FRAMES: &str = "additional_frames";

/// Pixel payload attached to an envelope.
///
/// A blob holds the buffer that was re-homed from a frame view; dropping the
/// blob runs the buffer's original deleter. This is how buffer lifetimes are
/// handed to the bus: the transport keeps the envelope alive until the blobs
/// have been transmitted.
pub struct Blob {
    pub(crate) buffer: ViewBuffer,
}

impl Blob {
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn len(&self) -> usize {
        self.buffer.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.bytes().is_empty()
    }

    /// Reference-counted bytes for attaching the blob to a frame view.
    pub(crate) fn into_shared(self) -> Arc<Vec<u8>> {
        match self.buffer {
            ViewBuffer::Owned(data) => Arc::new(data),
            ViewBuffer::Shared(data) => data,
            // External memory cannot be shared safely once the owner is gone;
            // take a copy and release the owner.
            ViewBuffer::External(backing) => Arc::new(backing.bytes().to_vec()),
        }
    }
}

/// Metadata tree plus blobs, flowing to or from the external bus.
pub struct Envelope {
    meta: Map<String, Value>,
    blobs: Vec<Blob>,
}

impl Envelope {
    /// Assemble an envelope on the receiving side of the bus.
    pub fn from_parts(meta: Map<String, Value>, payloads: Vec<Vec<u8>>) -> Self {
        let blobs = payloads
            .into_iter()
            .map(|data| Blob {
                buffer: ViewBuffer::Owned(data),
            })
            .collect();
        Self { meta, blobs }
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn blob(&self, index: usize) -> Option<&Blob> {
        self.blobs.get(index)
    }
}

pub(crate) fn serialize(frame: Frame) -> Result<Envelope, FrameError> {
    let Frame { views, mut meta } = frame;
    if views.is_empty() {
        return Err(FrameError::IllegalState("frame has no views"));
    }
    debug!("Serializing frame with {} view(s)", views.len());

    let mut blobs = Vec::with_capacity(views.len());
    let mut additional = Vec::with_capacity(views.len().saturating_sub(1));

    for (index, mut view) in views.into_iter().enumerate() {
        codec::commit(&mut view)?;
        let FrameView {
            buffer,
            width,
            height,
            channels,
            encoding,
            encode_level,
            img_handle,
            ..
        } = view;

        if index == 0 {
            meta.insert(KEY_IMG_HANDLE.into(), Value::from(img_handle));
            meta.insert(KEY_WIDTH.into(), Value::from(width));
            meta.insert(KEY_HEIGHT.into(), Value::from(height));
            meta.insert(KEY_CHANNELS.into(), Value::from(channels));
            meta.insert(KEY_ENCODING_TYPE.into(), Value::from(encoding.as_str()));
            meta.insert(KEY_ENCODING_LEVEL.into(), Value::from(encode_level));
        } else {
            let mut obj = Map::new();
            obj.insert(KEY_IMG_HANDLE.into(), Value::from(img_handle));
            obj.insert(KEY_WIDTH.into(), Value::from(width));
            obj.insert(KEY_HEIGHT.into(), Value::from(height));
            obj.insert(KEY_CHANNELS.into(), Value::from(channels));
            obj.insert(KEY_ENCODING_TYPE.into(), Value::from(encoding.as_str()));
            obj.insert(KEY_ENCODING_LEVEL.into(), Value::from(encode_level));
            additional.push(Value::Object(obj));
        }

        blobs.push(Blob { buffer });
    }

    if additional.is_empty() {
        meta.remove(KEY_ADDITIONAL_FRAMES);
    } else {
        meta.insert(KEY_ADDITIONAL_FRAMES.into(), Value::Array(additional));
    }

    Ok(Envelope { meta, blobs })
}

pub(crate) fn deserialize(envelope: Envelope) -> Result<Frame, FrameError> {
    let Envelope { mut meta, blobs } = envelope;
    if blobs.is_empty() {
        return Err(FrameError::Envelope("envelope carries no blobs".into()));
    }
    debug!("Deserializing frame from {} blob(s)", blobs.len());

    // The additional_frames array is consumed here and re-created on the next
    // serialization; the promoted scalar keys stay in the tree (they are
    // overwritten when the frame is re-serialized).
    let additional = match meta.remove(KEY_ADDITIONAL_FRAMES) {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(FrameError::Envelope(format!(
                "{KEY_ADDITIONAL_FRAMES:?} must be an array"
            )))
        }
    };

    let expected = 1 + additional.len();
    if blobs.len() != expected {
        return Err(FrameError::Envelope(format!(
            "envelope has {} blob(s) but describes {expected} view(s)",
            blobs.len()
        )));
    }

    let mut shared = blobs.into_iter().map(Blob::into_shared);
    let mut views = Vec::with_capacity(expected);

    let primary = view_fields(&meta)?;
    views.push(primary.into_view(shared.next().expect("blob count checked")));

    for entry in &additional {
        let obj = entry.as_object().ok_or_else(|| {
            FrameError::Envelope(format!("{KEY_ADDITIONAL_FRAMES:?} entries must be objects"))
        })?;
        let fields = view_fields(obj)?;
        views.push(fields.into_view(shared.next().expect("blob count checked")));
    }

    Ok(Frame { views, meta })
}

struct ViewFields {
    img_handle: String,
    width: i32,
    height: i32,
    channels: i32,
    encoding: EncodeType,
    encode_level: i32,
}

impl ViewFields {
    fn into_view(self, data: Arc<Vec<u8>>) -> FrameView {
        FrameView::shared(
            data,
            self.img_handle,
            self.width,
            self.height,
            self.channels,
            self.encoding,
            self.encode_level,
        )
    }
}

fn view_fields(obj: &Map<String, Value>) -> Result<ViewFields, FrameError> {
    let img_handle = obj
        .get(KEY_IMG_HANDLE)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(KEY_IMG_HANDLE))?
        .to_string();
    let width = int_field(obj, KEY_WIDTH)?;
    let height = int_field(obj, KEY_HEIGHT)?;
    let channels = int_field(obj, KEY_CHANNELS)?;
    let encoding_name = obj
        .get(KEY_ENCODING_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(KEY_ENCODING_TYPE))?;
    let encoding = EncodeType::from_wire(encoding_name).ok_or_else(|| {
        FrameError::Envelope(format!("unknown encoding type {encoding_name:?}"))
    })?;
    let encode_level = int_field(obj, KEY_ENCODING_LEVEL)?;

    if width <= 0 || height <= 0 || channels <= 0 {
        return Err(FrameError::Envelope(
            "view dimensions must be positive".into(),
        ));
    }

    Ok(ViewFields {
        img_handle,
        width,
        height,
        channels,
        encoding,
        encode_level,
    })
}

fn int_field(obj: &Map<String, Value>, key: &str) -> Result<i32, FrameError> {
    obj.get(key)
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| missing(key))
}

fn missing(key: &str) -> FrameError {
    FrameError::Envelope(format!("missing or mistyped key {key:?}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::frame::PixelBacking;

    struct CountingBacking {
        bytes: Vec<u8>,
        drops: Arc<AtomicUsize>,
    }

    impl PixelBacking for CountingBacking {
        fn bytes(&self) -> &[u8] {
            &self.bytes
        }
    }

    impl Drop for CountingBacking {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn serialize_promotes_primary_view_fields() {
        let mut frame = Frame::new(FrameView::owned(vec![5; 12], 2, 2, 3));
        frame
            .metadata_mut()
            .insert("camera".into(), Value::from("cam-0"));

        let env = frame.serialize().unwrap();
        let meta = env.metadata();
        assert_eq!(meta[KEY_WIDTH], Value::from(2));
        assert_eq!(meta[KEY_HEIGHT], Value::from(2));
        assert_eq!(meta[KEY_CHANNELS], Value::from(3));
        assert_eq!(meta[KEY_ENCODING_TYPE], Value::from("none"));
        assert_eq!(meta[KEY_ENCODING_LEVEL], Value::from(0));
        assert_eq!(meta["camera"], Value::from("cam-0"));
        assert!(meta.get(KEY_ADDITIONAL_FRAMES).is_none());
        assert_eq!(env.blob_count(), 1);
        assert_eq!(env.blob(0).unwrap().bytes(), &[5; 12]);
    }

    #[test]
    fn serialize_appends_additional_views_in_order() {
        let mut frame = Frame::new(FrameView::owned(vec![1; 12], 2, 2, 3));
        frame.add_view(FrameView::owned(vec![2; 4], 2, 2, 1));
        frame.add_view(FrameView::owned(vec![3; 4], 2, 2, 1));

        let env = frame.serialize().unwrap();
        assert_eq!(env.blob_count(), 3);
        let extra = env.metadata()[KEY_ADDITIONAL_FRAMES].as_array().unwrap();
        assert_eq!(extra.len(), 2);
        assert_eq!(extra[0][KEY_CHANNELS], Value::from(1));
        assert_eq!(env.blob(1).unwrap().bytes(), &[2; 4]);
        assert_eq!(env.blob(2).unwrap().bytes(), &[3; 4]);
    }

    #[test]
    fn serialize_rehomes_deleters_onto_the_envelope() {
        let drops = Arc::new(AtomicUsize::new(0));
        let frame = Frame::new(FrameView::external(
            Box::new(CountingBacking {
                bytes: vec![9; 4],
                drops: drops.clone(),
            }),
            2,
            2,
            1,
        ));

        let env = frame.serialize().unwrap();
        // The frame is gone but the backing lives on in the blob.
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(env.blob(0).unwrap().bytes(), &[9; 4]);

        drop(env);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn round_trip_preserves_views_and_metadata() {
        let mut frame = Frame::new(FrameView::owned(vec![1, 2, 3, 4], 2, 2, 1));
        frame.add_view(FrameView::owned(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 1, 2], 2, 2, 3));
        frame
            .metadata_mut()
            .insert("sequence".into(), Value::from(42));
        let handles = [
            frame.img_handle(0).unwrap().to_string(),
            frame.img_handle(1).unwrap().to_string(),
        ];

        let restored = Frame::from_envelope(frame.serialize().unwrap()).unwrap();
        assert_eq!(restored.view_count(), 2);
        assert_eq!(restored.data(0).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(
            restored.data(1).unwrap(),
            &[9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 1, 2]
        );
        assert_eq!(restored.width(1).unwrap(), 2);
        assert_eq!(restored.channels(1).unwrap(), 3);
        assert_eq!(restored.img_handle(0).unwrap(), handles[0]);
        assert_eq!(restored.img_handle(1).unwrap(), handles[1]);
        assert_eq!(restored.metadata()["sequence"], Value::from(42));
    }

    #[test]
    fn encoded_round_trip_keeps_the_encoded_stream() {
        let frame = Frame::new(
            FrameView::owned(vec![0; 48], 4, 4, 3)
                .with_encoding(EncodeType::Png, 6)
                .unwrap(),
        );
        let env = frame.serialize().unwrap();
        let png = env.blob(0).unwrap().bytes().to_vec();

        let restored = Frame::from_envelope(env).unwrap();
        assert_eq!(restored.encoding(0).unwrap(), EncodeType::Png);
        assert_eq!(restored.encode_level(0).unwrap(), 6);
        // Dimensions describe the decoded image; the payload stays encoded.
        assert_eq!(restored.width(0).unwrap(), 4);
        assert_eq!(restored.data(0).unwrap(), &png[..]);

        // Re-serializing reattaches the same stream without a second encode.
        let env2 = restored.serialize().unwrap();
        assert_eq!(env2.blob(0).unwrap().bytes(), &png[..]);
    }

    #[test]
    fn blob_count_mismatch_is_rejected() {
        let frame = Frame::new(FrameView::owned(vec![0; 4], 2, 2, 1));
        let env = frame.serialize().unwrap();
        let meta = env.metadata().clone();
        let broken = Envelope::from_parts(meta, vec![vec![0; 4], vec![1; 4]]);
        assert!(matches!(
            Frame::from_envelope(broken),
            Err(FrameError::Envelope(_))
        ));
    }

    #[test]
    fn missing_keys_are_rejected() {
        let broken = Envelope::from_parts(Map::new(), vec![vec![0; 4]]);
        assert!(matches!(
            Frame::from_envelope(broken),
            Err(FrameError::Envelope(_))
        ));
    }
}
