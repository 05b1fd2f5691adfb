//! Bridges between the core image types and `image`/`imageproc` buffers.

use dotboard_core::{GrayImage, GrayImageView, Histogram};
use image::Luma;

/// Copy a core view into an `image` buffer for `imageproc` operations.
pub(crate) fn to_luma(view: &GrayImageView<'_>) -> image::GrayImage {
    image::GrayImage::from_fn(view.width as u32, view.height as u32, |x, y| {
        Luma([view.data[y as usize * view.width + x as usize]])
    })
}

pub(crate) fn from_luma(img: image::GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    GrayImage {
        width: width as usize,
        height: height as usize,
        data: img.into_raw(),
    }
}

/// Borrow an `image::GrayImage` as a core view.
pub fn luma_view(img: &image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Gaussian sigma matching an odd box-kernel side, as used by common
/// blur implementations when only the kernel size is given.
pub(crate) fn sigma_for_kernel(k: u32) -> f32 {
    let k = k.max(1) as f32;
    (0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8).max(0.1)
}

pub(crate) fn median_intensity(img: &image::GrayImage) -> f64 {
    Histogram::from_samples(img.as_raw().iter().copied())
        .median()
        .map(f64::from)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_preserve_pixels() {
        let core = GrayImage::from_raw(3, 2, vec![1, 2, 3, 4, 5, 6]).expect("buffer");
        let luma = to_luma(&core.view());
        assert_eq!(luma.get_pixel(2, 1)[0], 6);
        assert_eq!(luma_view(&luma).data, core.data.as_slice());
        assert_eq!(from_luma(luma), core);
    }

    #[test]
    fn kernel_sigma_is_positive() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!(sigma_for_kernel(1) > 0.0);
    }
}
