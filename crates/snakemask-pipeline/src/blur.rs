//! Fixed-size Gaussian blur for edge-field smoothing.
//!
//! The edge field is always computed over a 17×17 window so that the
//! force field matches the reference masks, whatever σ the caller
//! picks. `imageproc::filter::gaussian_blur_f32` sizes its kernel from
//! σ, so the kernel is built here and applied with
//! [`imageproc::filter::separable_filter_equal`].

use image::GrayImage;

/// Side length of the smoothing window.
pub const KERNEL_SIZE: usize = 17;

/// σ used when the caller passes a non-positive value, derived from the
/// window size the same way OpenCV does for a fixed aperture.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sigma_for_window() -> f32 {
    0.3f32.mul_add(((KERNEL_SIZE - 1) as f32).mul_add(0.5, -1.0), 0.8)
}

/// Normalized 1D Gaussian weights for the fixed window.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_kernel(sigma: f32) -> [f32; KERNEL_SIZE] {
    let sigma = if sigma > 0.0 { sigma } else { sigma_for_window() };
    let center = (KERNEL_SIZE / 2) as f32;
    let denom = 2.0 * sigma * sigma;

    let mut kernel: [f32; KERNEL_SIZE] = std::array::from_fn(|i| {
        let d = i as f32 - center;
        (-(d * d) / denom).exp()
    });
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Blur a grayscale image with a 17×17 Gaussian of standard deviation
/// `sigma`.
///
/// The filter is separable, so it runs as one horizontal and one
/// vertical 17-tap pass. Borders are handled by clamping.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur_fixed(image: &GrayImage, sigma: f32) -> GrayImage {
    let kernel = gaussian_kernel(sigma);
    imageproc::filter::separable_filter_equal(image, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(30, 10, |x, _y| {
            if x < 15 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(3.0);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..KERNEL_SIZE {
            assert!((k[i] - k[KERNEL_SIZE - 1 - i]).abs() < 1e-7);
        }
        assert!(k[KERNEL_SIZE / 2] > k[0]);
    }

    #[test]
    fn wider_sigma_flattens_kernel() {
        let narrow = gaussian_kernel(1.0);
        let wide = gaussian_kernel(5.0);
        assert!(wide[KERNEL_SIZE / 2] < narrow[KERNEL_SIZE / 2]);
        assert!(wide[0] > narrow[0]);
    }

    #[test]
    fn non_positive_sigma_uses_window_sigma() {
        assert_eq!(gaussian_kernel(0.0), gaussian_kernel(sigma_for_window()));
        assert_eq!(gaussian_kernel(-2.0), gaussian_kernel(sigma_for_window()));
        assert!((sigma_for_window() - 2.9).abs() < 1e-5);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur_fixed(&img, 3.0);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_pixel(20, 20, image::Luma([128]));
        let blurred = gaussian_blur_fixed(&img, 3.0);
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(diff.abs() <= 1, "expected ~128, got {}", pixel.0[0]);
        }
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = gaussian_blur_fixed(&sharp_edge_image(), 3.0);
        let left = blurred.get_pixel(14, 5).0[0];
        let right = blurred.get_pixel(15, 5).0[0];
        assert!(left > 0, "left of edge should brighten, got {left}");
        assert!(right < 255, "right of edge should darken, got {right}");
        // Far from the edge the image is untouched.
        assert_eq!(blurred.get_pixel(0, 5).0[0], 0);
        assert!(blurred.get_pixel(29, 5).0[0] >= 254);
    }
}
