//! Core primitives of the frameflow pipeline: the polymorphic [`Frame`]
//! container, the blocking [`FrameQueue`] connecting pipeline stages, the
//! serialization [`Envelope`] handed to the message bus, and the optional
//! [`Profiling`] timestamp sink.
//!
//! Ownership is the organizing principle. A frame owns every pixel buffer it
//! carries; replacing or destroying a view releases the buffer exactly once,
//! and serialization re-homes the buffers onto the outgoing envelope so they
//! are released only after the bus has transmitted them.

mod codec;
mod envelope;
mod error;
mod frame;
mod profiling;
mod queue;

pub use envelope::{Blob, Envelope};
pub use error::FrameError;
pub use frame::{EncodeType, Frame, FrameView, PixelBacking, ViewBuffer};
pub use profiling::Profiling;
pub use queue::{BlockingQueue, FrameQueue, PushOutcome};
