//! High level video frame abstraction.
//!
//! A [`Frame`] is an ordered, non-empty sequence of *views*. Each view owns
//! one pixel buffer together with its geometry and encoding state; a frame
//! with several views keeps time-aligned streams (for example color plus
//! depth) in a single container without a separate synchronization layer.
//!
//! Frames are created by an ingestor or a prior UDF, mutated in place by UDFs
//! through [`Frame::set_data`], and leave the process exactly once through
//! the consuming [`Frame::serialize`].

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde_json::{Map, Value};

use crate::envelope::{self, Envelope};
use crate::error::FrameError;

/// Encoding applied (or requested) for a view's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeType {
    None,
    Jpeg,
    Png,
}

impl EncodeType {
    /// Wire name used in envelope metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            EncodeType::None => "none",
            EncodeType::Jpeg => "jpeg",
            EncodeType::Png => "png",
        }
    }

    pub(crate) fn from_wire(name: &str) -> Option<Self> {
        match name {
            "none" => Some(EncodeType::None),
            "jpeg" => Some(EncodeType::Jpeg),
            "png" => Some(EncodeType::Png),
            _ => None,
        }
    }

    /// JPEG levels are qualities in `0..=100`; PNG levels are compression
    /// levels in `0..=9`.
    pub(crate) fn validate_level(self, level: i32) -> Result<(), FrameError> {
        let valid = match self {
            EncodeType::None => true,
            EncodeType::Jpeg => (0..=100).contains(&level),
            EncodeType::Png => (0..=9).contains(&level),
        };
        if valid {
            Ok(())
        } else {
            Err(FrameError::InvalidEncodeLevel {
                encoding: self,
                level,
            })
        }
    }
}

/// Owner of pixel memory that lives in a third-party container.
///
/// Implementations wrap decoded-image handles, hardware-buffer wrappers, or
/// any other external allocation. Dropping the backing is the view's deleter;
/// it runs exactly once, when the view is replaced, when the frame is
/// destroyed, or (after serialization) when the envelope releases the blob.
pub trait PixelBacking: Send {
    /// Borrow the pixel bytes. The slice must stay valid for the lifetime of
    /// the backing.
    fn bytes(&self) -> &[u8];
}

/// Storage behind one view.
pub enum ViewBuffer {
    /// Pixels owned directly by the frame.
    Owned(Vec<u8>),
    /// Pixels shared with an envelope, as produced by deserialization.
    Shared(Arc<Vec<u8>>),
    /// Pixels owned by an opaque external container.
    External(Box<dyn PixelBacking>),
}

impl ViewBuffer {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ViewBuffer::Owned(data) => data,
            ViewBuffer::Shared(data) => data,
            ViewBuffer::External(backing) => backing.bytes(),
        }
    }
}

impl fmt::Debug for ViewBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ViewBuffer::Owned(_) => "Owned",
            ViewBuffer::Shared(_) => "Shared",
            ViewBuffer::External(_) => "External",
        };
        write!(f, "ViewBuffer::{kind}({} bytes)", self.bytes().len())
    }
}

/// One pixel buffer within a frame plus its geometry and encoding state.
///
/// `encoding`/`encode_level` advertise the *target* encoding; the bytes are
/// only transcoded at the serialization commit point. `committed` records
/// what the buffer currently holds (`None` for raw pixels), so dimensions
/// always describe the decoded image.
pub struct FrameView {
    pub(crate) buffer: ViewBuffer,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) channels: i32,
    pub(crate) encoding: EncodeType,
    pub(crate) encode_level: i32,
    pub(crate) committed: Option<(EncodeType, i32)>,
    pub(crate) img_handle: String,
}

impl FrameView {
    /// View over raw pixels owned by the frame.
    pub fn owned(data: Vec<u8>, width: i32, height: i32, channels: i32) -> Self {
        Self::from_buffer(ViewBuffer::Owned(data), width, height, channels)
    }

    /// View over an external pixel container; the backing's `Drop` is the
    /// view's deleter.
    pub fn external(backing: Box<dyn PixelBacking>, width: i32, height: i32, channels: i32) -> Self {
        Self::from_buffer(ViewBuffer::External(backing), width, height, channels)
    }

    fn from_buffer(buffer: ViewBuffer, width: i32, height: i32, channels: i32) -> Self {
        debug_assert!(width > 0 && height > 0 && channels > 0);
        Self {
            buffer,
            width,
            height,
            channels,
            encoding: EncodeType::None,
            encode_level: 0,
            committed: None,
            img_handle: generate_img_handle(),
        }
    }

    /// Attach a target encoding at construction time.
    pub fn with_encoding(mut self, encoding: EncodeType, level: i32) -> Result<Self, FrameError> {
        encoding.validate_level(level)?;
        self.encoding = encoding;
        self.encode_level = level;
        Ok(self)
    }

    /// View over an envelope blob whose bytes are already encoded as stated.
    pub(crate) fn shared(
        data: Arc<Vec<u8>>,
        img_handle: String,
        width: i32,
        height: i32,
        channels: i32,
        encoding: EncodeType,
        encode_level: i32,
    ) -> Self {
        let committed = (encoding != EncodeType::None).then_some((encoding, encode_level));
        Self {
            buffer: ViewBuffer::Shared(data),
            width,
            height,
            channels,
            encoding,
            encode_level,
            committed,
            img_handle,
        }
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn channels(&self) -> i32 {
        self.channels
    }

    pub fn encoding(&self) -> EncodeType {
        self.encoding
    }

    pub fn encode_level(&self) -> i32 {
        self.encode_level
    }

    pub fn img_handle(&self) -> &str {
        &self.img_handle
    }
}

impl fmt::Debug for FrameView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameView")
            .field("img_handle", &self.img_handle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("encoding", &self.encoding)
            .field("encode_level", &self.encode_level)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// Polymorphic zero-copy frame container.
///
/// Invariants: a frame holds at least one view from construction to
/// destruction, and every view's buffer is released exactly once. The
/// LIVE→SERIALIZED transition of the original design is expressed by
/// ownership: [`Frame::serialize`] consumes the frame, so no mutator can run
/// afterwards and the buffers cannot be handed out twice.
pub struct Frame {
    pub(crate) views: Vec<FrameView>,
    pub(crate) meta: Map<String, Value>,
}

impl Frame {
    /// Frame with a single view and an empty metadata envelope.
    pub fn new(view: FrameView) -> Self {
        Self {
            views: vec![view],
            meta: Map::new(),
        }
    }

    /// Reconstruct a live frame from an incoming envelope. Every blob becomes
    /// a shared view; releasing the frame drops the blob references.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, FrameError> {
        envelope::deserialize(envelope)
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Append another view for the frame to track.
    pub fn add_view(&mut self, view: FrameView) {
        self.views.push(view);
    }

    /// Replace view `index`. The prior view's buffer is released before this
    /// returns.
    pub fn set_data(&mut self, index: usize, view: FrameView) -> Result<(), FrameError> {
        let count = self.views.len();
        let slot = self
            .views
            .get_mut(index)
            .ok_or(FrameError::OutOfRange { index, count })?;
        *slot = view;
        Ok(())
    }

    /// Advertise a target encoding for view `index`. This is a request only;
    /// the bytes are transcoded when the frame is serialized.
    pub fn set_encoding(
        &mut self,
        index: usize,
        encoding: EncodeType,
        level: i32,
    ) -> Result<(), FrameError> {
        encoding.validate_level(level)?;
        let count = self.views.len();
        let view = self
            .views
            .get_mut(index)
            .ok_or(FrameError::OutOfRange { index, count })?;
        view.encoding = encoding;
        view.encode_level = level;
        Ok(())
    }

    pub fn width(&self, index: usize) -> Result<i32, FrameError> {
        self.view(index).map(|v| v.width)
    }

    pub fn height(&self, index: usize) -> Result<i32, FrameError> {
        self.view(index).map(|v| v.height)
    }

    pub fn channels(&self, index: usize) -> Result<i32, FrameError> {
        self.view(index).map(|v| v.channels)
    }

    /// Bytes currently held by view `index` (raw pixels, or an encoded stream
    /// for deserialized views).
    pub fn data(&self, index: usize) -> Result<&[u8], FrameError> {
        self.view(index).map(|v| v.buffer.bytes())
    }

    pub fn encoding(&self, index: usize) -> Result<EncodeType, FrameError> {
        self.view(index).map(|v| v.encoding)
    }

    pub fn encode_level(&self, index: usize) -> Result<i32, FrameError> {
        self.view(index).map(|v| v.encode_level)
    }

    pub fn img_handle(&self, index: usize) -> Result<&str, FrameError> {
        self.view(index).map(|v| v.img_handle.as_str())
    }

    /// Metadata envelope: a recursive typed tree, mutable until the frame is
    /// serialized.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    /// One-shot serialization into an outgoing envelope.
    ///
    /// Consuming the frame makes the transition irreversible: the views'
    /// buffers are re-homed onto the envelope and released only when the
    /// envelope is dropped, i.e. after the bus has transmitted the blobs.
    /// Pending encoding requests are committed here — a view whose target
    /// encoding differs from what its buffer holds is transcoded.
    pub fn serialize(self) -> Result<Envelope, FrameError> {
        envelope::serialize(self)
    }

    fn view(&self, index: usize) -> Result<&FrameView, FrameError> {
        self.views.get(index).ok_or(FrameError::OutOfRange {
            index,
            count: self.views.len(),
        })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("views", &self.views)
            .field("meta_keys", &self.meta.len())
            .finish()
    }
}

/// Handles identify a view's payload across the bus; collisions are harmless
/// but avoided by construction.
fn generate_img_handle() -> String {
    let mut rng = rand::rng();
    (0..8).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}
