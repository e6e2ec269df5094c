//! Commit point for view encoding requests.
//!
//! [`Frame::set_encoding`](crate::Frame::set_encoding) only advertises a
//! target; the transcode happens here, during serialization. A view whose
//! buffer already matches its target is left untouched.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, GenericImageView, ImageEncoder};
use tracing::debug;

use crate::error::FrameError;
use crate::frame::{EncodeType, FrameView, ViewBuffer};

/// Bring the view's buffer in line with its advertised encoding.
pub(crate) fn commit(view: &mut FrameView) -> Result<(), FrameError> {
    let target = (view.encoding, view.encode_level);
    match view.committed {
        Some(committed) if committed == target => return Ok(()),
        // The buffer holds a different encoding; go back to raw pixels first.
        Some(_) => decode_in_place(view)?,
        None => {}
    }
    if view.encoding != EncodeType::None {
        encode_in_place(view)?;
    }
    Ok(())
}

fn encode_in_place(view: &mut FrameView) -> Result<(), FrameError> {
    debug!(
        "Encoding view {} as {:?} (level {})",
        view.img_handle, view.encoding, view.encode_level
    );
    let width = view.width as u32;
    let height = view.height as u32;
    let raw = view.buffer.bytes();
    let expected = width as usize * height as usize * view.channels as usize;
    if raw.len() != expected {
        return Err(FrameError::IllegalState(
            "raw buffer length does not match view dimensions",
        ));
    }
    let color = color_type(view.channels)?;

    let mut out = Vec::new();
    let result = match view.encoding {
        EncodeType::Jpeg => {
            // The encoder rejects quality 0; the original treats it as lowest.
            let quality = view.encode_level.clamp(1, 100) as u8;
            JpegEncoder::new_with_quality(&mut out, quality).write_image(raw, width, height, color)
        }
        EncodeType::Png => {
            PngEncoder::new_with_quality(&mut out, compression(view.encode_level), FilterType::Adaptive)
                .write_image(raw, width, height, color)
        }
        EncodeType::None => return Ok(()),
    };
    result.map_err(|err| FrameError::Codec(err.to_string()))?;

    // The raw buffer is released here; encoding is irreversible for it.
    view.buffer = ViewBuffer::Owned(out);
    view.committed = Some((view.encoding, view.encode_level));
    Ok(())
}

fn decode_in_place(view: &mut FrameView) -> Result<(), FrameError> {
    let img = image::load_from_memory(view.buffer.bytes())
        .map_err(|err| FrameError::Codec(err.to_string()))?;
    let (width, height) = img.dimensions();
    let raw = match view.channels {
        1 => img.to_luma8().into_raw(),
        3 => img.to_rgb8().into_raw(),
        4 => img.to_rgba8().into_raw(),
        other => {
            return Err(FrameError::Codec(format!(
                "unsupported channel count {other} for decode"
            )))
        }
    };
    view.width = width as i32;
    view.height = height as i32;
    view.buffer = ViewBuffer::Owned(raw);
    view.committed = None;
    Ok(())
}

fn color_type(channels: i32) -> Result<ExtendedColorType, FrameError> {
    match channels {
        1 => Ok(ExtendedColorType::L8),
        3 => Ok(ExtendedColorType::Rgb8),
        4 => Ok(ExtendedColorType::Rgba8),
        other => Err(FrameError::Codec(format!(
            "unsupported channel count {other} for encode"
        ))),
    }
}

/// Map the 0..=9 zlib-style level onto the encoder's presets.
fn compression(level: i32) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameView;

    fn raw_view(width: i32, height: i32, channels: i32) -> FrameView {
        let len = (width * height * channels) as usize;
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        FrameView::owned(data, width, height, channels)
    }

    #[test]
    fn jpeg_commit_produces_a_jpeg_stream() {
        let mut view = raw_view(8, 8, 3).with_encoding(EncodeType::Jpeg, 80).unwrap();
        commit(&mut view).unwrap();
        let bytes = view.data();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(view.committed, Some((EncodeType::Jpeg, 80)));
        // Dimensions keep describing the decoded image.
        assert_eq!(view.width(), 8);
        assert_eq!(view.height(), 8);
    }

    #[test]
    fn png_commit_round_trips_losslessly() {
        let original = raw_view(4, 4, 3);
        let original_bytes = original.data().to_vec();

        let mut view = raw_view(4, 4, 3).with_encoding(EncodeType::Png, 6).unwrap();
        commit(&mut view).unwrap();
        assert_eq!(&view.data()[..4], &[0x89, b'P', b'N', b'G']);

        // Switching the target back to raw decodes the committed stream.
        view.encoding = EncodeType::None;
        view.encode_level = 0;
        commit(&mut view).unwrap();
        assert_eq!(view.data(), &original_bytes[..]);
        assert_eq!(view.committed, None);
    }

    #[test]
    fn commit_is_idempotent_for_matching_state() {
        let mut view = raw_view(4, 4, 1).with_encoding(EncodeType::Png, 9).unwrap();
        commit(&mut view).unwrap();
        let first = view.data().to_vec();
        commit(&mut view).unwrap();
        assert_eq!(view.data(), &first[..]);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut view = FrameView::owned(vec![0; 5], 2, 2, 3)
            .with_encoding(EncodeType::Jpeg, 50)
            .unwrap();
        assert!(matches!(
            commit(&mut view),
            Err(FrameError::IllegalState(_))
        ));
    }

    #[test]
    fn unsupported_channel_count_is_rejected() {
        let mut view = raw_view(2, 2, 2).with_encoding(EncodeType::Png, 1).unwrap();
        assert!(matches!(commit(&mut view), Err(FrameError::Codec(_))));
    }
}
