//! Image decoding and the excess-green vegetation index.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces a
//! single-channel field that emphasizes plant material against the
//! background. This is the first step of refinement: raw bytes in,
//! 8-bit index image out, ready for edge-field construction.
//!
//! Per pixel, each channel is divided by that channel's maximum over
//! the whole image; with `L` the sum of the normalized channels the
//! index is `3 * green / L - 1`, ranging from -1 (no green) to 2 (pure
//! green).

use image::{GrayImage, RgbImage};

use crate::types::{ChannelOrder, RefineError, ScalarField};

/// Decode raw image bytes into a three-channel RGB image.
///
/// The returned buffer is always in [`ChannelOrder::Rgb`].
///
/// # Errors
///
/// Returns [`RefineError::EmptyInput`] if `bytes` is empty.
/// Returns [`RefineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, RefineError> {
    if bytes.is_empty() {
        return Err(RefineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Compute the excess-green index of a color image.
///
/// `order` says how the three channels of `image` are stored. Pixels
/// whose normalized channels sum to zero (pure black) map to -1.
///
/// # Errors
///
/// Returns [`RefineError::DegenerateImage`] naming the first channel
/// whose maximum over the image is zero.
pub fn excess_green(image: &RgbImage, order: ChannelOrder) -> Result<ScalarField, RefineError> {
    let mut maxima = [0u8; 3];
    for pixel in image.pixels() {
        for (max, &value) in maxima.iter_mut().zip(pixel.0.iter()) {
            *max = (*max).max(value);
        }
    }

    let names = order.names();
    if let Some(c) = maxima.iter().position(|&m| m == 0) {
        return Err(RefineError::DegenerateImage { channel: names[c] });
    }

    let scale = maxima.map(|m| 1.0 / f32::from(m));
    let green = order.green_index();

    Ok(ScalarField::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0;
        let norm: [f32; 3] = std::array::from_fn(|c| f32::from(p[c]) * scale[c]);
        let sum: f32 = norm.iter().sum();
        let index = if sum > 0.0 {
            3.0 * norm[green] / sum - 1.0
        } else {
            -1.0
        };
        image::Luma([index])
    }))
}

/// Min-max rescale a real-valued field into `0..=255`.
///
/// A constant field maps to all zeros.
#[must_use = "returns the rescaled image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rescale_to_u8(field: &ScalarField) -> GrayImage {
    let (min, max) = field
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.0[0]), hi.max(p.0[0]))
        });
    let range = max - min;

    GrayImage::from_fn(field.width(), field.height(), |x, y| {
        if range > 0.0 {
            // Truncation, not rounding, like the reference uint8 cast.
            let v = 255.0 * (field.get_pixel(x, y).0[0] - min) / range;
            image::Luma([v.clamp(0.0, 255.0) as u8])
        } else {
            image::Luma([0])
        }
    })
}

/// Excess-green index rescaled to an 8-bit image.
///
/// This is the scalar image the edge field is built from.
///
/// # Errors
///
/// Returns [`RefineError::DegenerateImage`] if a channel is zero
/// everywhere.
pub fn vegetation_image(image: &RgbImage, order: ChannelOrder) -> Result<GrayImage, RefineError> {
    let index = excess_green(image, order)?;
    Ok(rescale_to_u8(&index))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_rgb(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode_rgb(&[]), Err(RefineError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(RefineError::ImageDecode(_))));
    }

    #[test]
    fn decode_preserves_dimensions_and_color() {
        let img = RgbImage::from_pixel(7, 3, image::Rgb([10, 200, 30]));
        let decoded = decode_rgb(&encode_rgb(&img)).unwrap();
        assert_eq!(decoded.dimensions(), (7, 3));
        assert_eq!(decoded.get_pixel(6, 2).0, [10, 200, 30]);
    }

    #[test]
    fn green_pixel_scores_highest() {
        let mut img = RgbImage::from_pixel(2, 1, image::Rgb([255, 255, 255]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 0]));
        let index = excess_green(&img, ChannelOrder::Rgb).unwrap();
        // White: 3 * 1 / 3 - 1 = 0. Pure green: 3 * 1 / 1 - 1 = 2.
        assert!(index.get_pixel(0, 0).0[0].abs() < 1e-6);
        assert!((index.get_pixel(1, 0).0[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn normalization_is_per_channel() {
        // Green never exceeds 100, so 100 normalizes to 1.
        let mut img = RgbImage::from_pixel(2, 1, image::Rgb([255, 100, 255]));
        img.put_pixel(1, 0, image::Rgb([0, 100, 0]));
        let index = excess_green(&img, ChannelOrder::Rgb).unwrap();
        assert!(index.get_pixel(0, 0).0[0].abs() < 1e-6);
        assert!((index.get_pixel(1, 0).0[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn black_pixels_map_to_floor() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([255, 255, 255]));
        let index = excess_green(&img, ChannelOrder::Rgb).unwrap();
        assert!((index.get_pixel(0, 0).0[0] + 1.0).abs() < 1e-6);
        assert!(!index.get_pixel(0, 0).0[0].is_nan());
    }

    #[test]
    fn zero_channel_is_degenerate() {
        let img = RgbImage::from_pixel(3, 3, image::Rgb([40, 80, 0]));
        let err = excess_green(&img, ChannelOrder::Rgb).unwrap_err();
        assert!(matches!(err, RefineError::DegenerateImage { channel: "blue" }));
    }

    #[test]
    fn degenerate_channel_is_named_in_storage_order() {
        let img = RgbImage::from_pixel(3, 3, image::Rgb([40, 80, 0]));
        let err = excess_green(&img, ChannelOrder::Bgr).unwrap_err();
        assert!(matches!(err, RefineError::DegenerateImage { channel: "red" }));
    }

    #[test]
    fn rescale_spans_full_range() {
        let field = ScalarField::from_fn(3, 1, |x, _| image::Luma([x as f32 - 1.0]));
        let gray = rescale_to_u8(&field);
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 127);
        assert_eq!(gray.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn rescale_constant_field_is_zero() {
        let field = ScalarField::from_pixel(4, 4, image::Luma([0.3]));
        let gray = rescale_to_u8(&field);
        assert!(gray.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn vegetation_image_separates_plant_from_soil() {
        let mut img = RgbImage::from_pixel(4, 4, image::Rgb([120, 90, 60]));
        img.put_pixel(2, 2, image::Rgb([40, 200, 40]));
        let gray = vegetation_image(&img, ChannelOrder::Rgb).unwrap();
        assert_eq!(gray.get_pixel(2, 2).0[0], 255);
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
    }
}
