//! Scalar mean brightness of a frame.

use duocam_types::{Frame, FrameFormat};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LumaError {
    #[error("frame has zero dimensions")]
    ZeroDimensions,
    #[error("unknown frame format {0}")]
    UnknownFormat(u32),
    #[error("data size {actual} inconsistent with frame geometry (expected {expected})")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("JPEG frame has no data")]
    EmptyJpeg,
    #[error("JPEG decode failed: {0}")]
    JpegDecode(String),
}

/// Collaborator that turns a JPEG bitstream into a mean luma value.
///
/// Full JPEG decoding is outside this crate's concern; the controller only
/// needs the scalar. The decoder may fail and its failure drops the sample.
pub trait JpegLumaDecoder: Send {
    /// Mean luma in `[0, 255]` of the decoded image.
    fn decode_luma(&self, data: &[u8]) -> Result<f64, LumaError>;
}

/// Default [JpegLumaDecoder] backed by the `image` crate.
pub struct ImageJpegDecoder;

impl JpegLumaDecoder for ImageJpegDecoder {
    fn decode_luma(&self, data: &[u8]) -> Result<f64, LumaError> {
        let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(|e| LumaError::JpegDecode(e.to_string()))?;
        let luma = decoded.to_luma8();
        let pixels = luma.as_raw();
        if pixels.is_empty() {
            return Err(LumaError::ZeroDimensions);
        }
        let sum: u64 = pixels.iter().map(|&b| u64::from(b)).sum();
        Ok(sum as f64 / pixels.len() as f64)
    }
}

/// Mean brightness of `frame` in `[0, 255]`.
///
/// NV12 averages the Y plane; RGB averages the BT.601 luma of every pixel;
/// JPEG delegates to `jpeg`. Malformed frames (zero dimensions, unknown
/// format, data size disagreeing with the geometry) are errors and must not
/// become brightness samples.
pub fn mean_luma(frame: &Frame, jpeg: &dyn JpegLumaDecoder) -> Result<f64, LumaError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(LumaError::ZeroDimensions);
    }
    let format = frame
        .frame_format()
        .map_err(|_| LumaError::UnknownFormat(frame.format))?;
    let pixels = frame.width as usize * frame.height as usize;
    let data_size = frame.data_size as usize;
    match format {
        FrameFormat::Nv12 => {
            let expected = pixels * 3 / 2;
            if data_size != expected {
                return Err(LumaError::SizeMismatch {
                    expected,
                    actual: data_size,
                });
            }
            // Y plane is the leading width*height bytes.
            let sum: u64 = frame.payload()[..pixels].iter().map(|&b| u64::from(b)).sum();
            Ok(sum as f64 / pixels as f64)
        }
        FrameFormat::Rgb => {
            let expected = pixels * 3;
            if data_size != expected {
                return Err(LumaError::SizeMismatch {
                    expected,
                    actual: data_size,
                });
            }
            let mut accum = 0.0f64;
            for px in frame.payload().chunks_exact(3) {
                accum += 0.299 * f64::from(px[0])
                    + 0.587 * f64::from(px[1])
                    + 0.114 * f64::from(px[2]);
            }
            Ok(accum / pixels as f64)
        }
        FrameFormat::Jpeg => {
            if data_size == 0 {
                return Err(LumaError::EmptyJpeg);
            }
            jpeg.decode_luma(frame.payload())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duocam_types::CameraId;

    fn frame(width: u32, height: u32, format: FrameFormat, data: &[u8]) -> Box<Frame> {
        let mut frame = Frame::boxed();
        frame.camera_id = CameraId::Day as u32;
        frame.width = width;
        frame.height = height;
        frame.format = format as u32;
        frame.set_data(data).unwrap();
        frame
    }

    #[test]
    fn nv12_averages_y_plane_only() {
        let (w, h) = (4u32, 2u32);
        let mut data = vec![100u8; (w * h) as usize];
        // chroma plane must not contribute
        data.extend_from_slice(&[255u8; 4]);
        let frame = frame(w, h, FrameFormat::Nv12, &data);
        assert_eq!(mean_luma(&frame, &ImageJpegDecoder).unwrap(), 100.0);
    }

    #[test]
    fn rgb_uses_bt601_weights() {
        // one pure red, one pure green pixel
        let data = [255u8, 0, 0, 0, 255, 0];
        let frame = frame(2, 1, FrameFormat::Rgb, &data);
        let expected = (0.299 * 255.0 + 0.587 * 255.0) / 2.0;
        let got = mean_luma(&frame, &ImageJpegDecoder).unwrap();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn jpeg_round_trips_through_decoder() {
        let (w, h) = (16u32, 16u32);
        let gray = image::GrayImage::from_pixel(w, h, image::Luma([128u8]));
        let mut encoded = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut encoded, 100)
            .encode(gray.as_raw(), w, h, image::ExtendedColorType::L8)
            .unwrap();
        let frame = frame(w, h, FrameFormat::Jpeg, &encoded);
        let got = mean_luma(&frame, &ImageJpegDecoder).unwrap();
        assert!((got - 128.0).abs() < 2.0, "got {got}");
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let zero_dim = frame(0, 2, FrameFormat::Rgb, &[]);
        assert_eq!(
            mean_luma(&zero_dim, &ImageJpegDecoder),
            Err(LumaError::ZeroDimensions)
        );

        let short = frame(4, 4, FrameFormat::Rgb, &[0u8; 10]);
        assert_eq!(
            mean_luma(&short, &ImageJpegDecoder),
            Err(LumaError::SizeMismatch {
                expected: 48,
                actual: 10
            })
        );

        let mut unknown = frame(4, 4, FrameFormat::Rgb, &[0u8; 48]);
        unknown.format = 9;
        assert_eq!(
            mean_luma(&unknown, &ImageJpegDecoder),
            Err(LumaError::UnknownFormat(9))
        );

        let empty_jpeg = frame(4, 4, FrameFormat::Jpeg, &[]);
        assert_eq!(
            mean_luma(&empty_jpeg, &ImageJpegDecoder),
            Err(LumaError::EmptyJpeg)
        );

        let bad_jpeg = frame(4, 4, FrameFormat::Jpeg, &[1, 2, 3]);
        assert!(matches!(
            mean_luma(&bad_jpeg, &ImageJpegDecoder),
            Err(LumaError::JpegDecode(_))
        ));
    }
}
