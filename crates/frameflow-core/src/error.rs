use thiserror::Error;

use crate::frame::EncodeType;

/// Errors surfaced by [`Frame`](crate::Frame) operations and the
/// serialization boundary.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A view index was outside the frame's view list.
    #[error("view index {index} out of range (frame has {count} view(s))")]
    OutOfRange { index: usize, count: usize },

    /// An operation was attempted in a state that does not permit it.
    #[error("illegal frame state: {0}")]
    IllegalState(&'static str),

    /// The encode level does not fit the requested encoding.
    #[error("invalid encode level {level} for {encoding:?}")]
    InvalidEncodeLevel { encoding: EncodeType, level: i32 },

    /// Encoding or decoding pixel data failed.
    #[error("codec failure: {0}")]
    Codec(String),

    /// An incoming envelope was structurally invalid.
    #[error("malformed envelope: {0}")]
    Envelope(String),
}
