use std::convert::TryFrom;

use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use super::color::{self, PixelLayout, Yuv420Planes};
use crate::{
    error::{PipelineError, Result},
    types::{CapturedFrame, DisplayBitmap, FrameFormat},
};

pub fn decode_frame(frame: &CapturedFrame) -> Result<DisplayBitmap> {
    match frame.format {
        FrameFormat::Jpeg => jpeg_to_bitmap(single_plane(frame)?),
        FrameFormat::Yuv420 => yuv420_to_bitmap(frame),
        FrameFormat::Rgba8888 => rgba_to_bitmap(single_plane(frame)?, frame.width, frame.height),
        FrameFormat::Unknown(_) => Err(PipelineError::UnsupportedFormat(frame.format.label())),
    }
}

fn single_plane(frame: &CapturedFrame) -> Result<&[u8]> {
    match frame.planes.as_slice() {
        [plane] => Ok(plane.as_slice()),
        planes => Err(PipelineError::InvalidFrameShape(format!(
            "{} frame must have 1 plane, got {}",
            frame.format.label(),
            planes.len()
        ))),
    }
}

fn jpeg_to_bitmap(data: &[u8]) -> Result<DisplayBitmap> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| PipelineError::DecodeError(format!("JPEG decode failed: {err:?}")))?;

    let Some(info) = decoder.info() else {
        return Err(PipelineError::DecodeError(
            "JPEG decoder reported no image info".to_string(),
        ));
    };
    let width = u32::try_from(info.width)
        .map_err(|_| PipelineError::DecodeError("JPEG width does not fit u32".to_string()))?;
    let height = u32::try_from(info.height)
        .map_err(|_| PipelineError::DecodeError("JPEG height does not fit u32".to_string()))?;

    DisplayBitmap::from_rgba(width, height, rgba).map_err(|err| {
        PipelineError::DecodeError(format!("JPEG decode produced a malformed bitmap: {err}"))
    })
}

fn yuv420_to_bitmap(frame: &CapturedFrame) -> Result<DisplayBitmap> {
    let [y, u, v] = frame.planes.as_slice() else {
        return Err(PipelineError::InvalidFrameShape(format!(
            "YUV 4:2:0 frame must have 3 planes, got {}",
            frame.planes.len()
        )));
    };

    let planes = Yuv420Planes {
        y,
        u,
        v,
        width: frame.width,
        height: frame.height,
    };
    let rgba = color::yuv420_to_rgb(&planes, PixelLayout::Rgba)?;
    DisplayBitmap::from_rgba(frame.width, frame.height, rgba)
}

fn rgba_to_bitmap(data: &[u8], width: u32, height: u32) -> Result<DisplayBitmap> {
    let expected_len = width as usize * height as usize * 4;
    if data.len() < expected_len {
        return Err(PipelineError::InvalidFrameShape(format!(
            "RGBA buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        )));
    }

    DisplayBitmap::from_rgba(width, height, data[..expected_len].to_vec())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn encode_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(rgb));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn planar_frame_goes_through_converter() {
        let frame = CapturedFrame::yuv420(vec![128; 16], vec![128; 4], vec![128; 4], 4, 4);
        let bitmap = decode_frame(&frame).unwrap();

        assert_eq!((bitmap.width(), bitmap.height()), (4, 4));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(bitmap.pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn jpeg_frame_is_decoded() {
        let data = encode_jpeg(16, 8, [200, 40, 40]);
        let frame = CapturedFrame::jpeg(data, 16, 8);
        let bitmap = decode_frame(&frame).unwrap();

        assert_eq!((bitmap.width(), bitmap.height()), (16, 8));
        let [r, g, b, a] = bitmap.pixel(8, 4);
        assert_eq!(a, 255);
        assert!(r > 150 && g < 90 && b < 90, "unexpected pixel {r},{g},{b}");
    }

    #[test]
    fn corrupt_jpeg_is_a_decode_error() {
        let frame = CapturedFrame::jpeg(vec![0xff, 0xd8, 0x00, 0x13, 0x37], 4, 4);
        assert!(matches!(
            decode_frame(&frame),
            Err(PipelineError::DecodeError(_))
        ));
    }

    #[test]
    fn packed_rgba_passes_through() {
        let pixels: Vec<u8> = (0..2 * 2 * 4).map(|i| i as u8).collect();
        let frame = CapturedFrame::rgba(pixels.clone(), 2, 2);
        let bitmap = decode_frame(&frame).unwrap();
        assert_eq!(bitmap.as_raw(), pixels.as_slice());
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let frame = CapturedFrame::new(FrameFormat::Unknown(0x23), 2, 2, vec![vec![0; 16]]);
        assert!(matches!(
            decode_frame(&frame),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn planar_frame_with_missing_plane_is_rejected() {
        let frame = CapturedFrame::new(
            FrameFormat::Yuv420,
            4,
            4,
            vec![vec![128; 16], vec![128; 4]],
        );
        assert!(matches!(
            decode_frame(&frame),
            Err(PipelineError::InvalidFrameShape(_))
        ));
    }
}
