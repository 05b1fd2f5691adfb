//! Optional per-stage PNG dumps.

use dotboard_core::GrayImage;
use image::{DynamicImage, Rgb};
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut, draw_line_segment_mut};
use log::{debug, warn};
use nalgebra::Point2;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static DEBUG_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Destination for debug images. Disabled sinks ignore every write.
#[derive(Debug, Default)]
pub struct DebugSink {
    dir: Option<PathBuf>,
}

impl DebugSink {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Create a fresh `dotboard-debug-<pid>-<n>` directory under the system
    /// temp dir. Falls back to a disabled sink if it cannot be created.
    pub fn create() -> Self {
        let n = DEBUG_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("dotboard-debug-{}-{}", std::process::id(), n));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                debug!("writing debug images to {}", dir.display());
                Self { dir: Some(dir) }
            }
            Err(err) => {
                warn!("cannot create debug dir {}: {err}", dir.display());
                Self::disabled()
            }
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    fn write(&self, name: &str, img: DynamicImage) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(format!("{name}.png"));
        if let Err(err) = img.save(&path) {
            warn!("failed to write {}: {err}", path.display());
        }
    }

    pub fn save_luma(&self, name: &str, img: &image::GrayImage) {
        if self.is_enabled() {
            self.write(name, DynamicImage::ImageLuma8(img.clone()));
        }
    }

    pub fn save_gray(&self, name: &str, img: &GrayImage) {
        if !self.is_enabled() {
            return;
        }
        if let Some(buf) =
            image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        {
            self.write(name, DynamicImage::ImageLuma8(buf));
        }
    }

    /// Input image with the chosen board outline drawn on top.
    pub fn save_quad(&self, name: &str, img: &image::GrayImage, quad: &[Point2<f64>; 4]) {
        if !self.is_enabled() {
            return;
        }
        let mut rgb = DynamicImage::ImageLuma8(img.clone()).to_rgb8();
        for i in 0..4 {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            draw_line_segment_mut(
                &mut rgb,
                (a.x as f32, a.y as f32),
                (b.x as f32, b.y as f32),
                Rgb([255, 0, 0]),
            );
        }
        self.write(name, DynamicImage::ImageRgb8(rgb));
    }

    /// Rectified board with small (green) and large (blue) dots marked.
    pub fn save_dots(
        &self,
        name: &str,
        img: &GrayImage,
        small: &[(Point2<f64>, f64)],
        large: &[(Point2<f64>, f64)],
    ) {
        if !self.is_enabled() {
            return;
        }
        let Some(buf) =
            image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        else {
            return;
        };
        let mut rgb = DynamicImage::ImageLuma8(buf).to_rgb8();
        for (dots, color) in [(small, Rgb([0, 200, 0])), (large, Rgb([0, 80, 255]))] {
            for (c, r) in dots {
                let center = (c.x.round() as i32, c.y.round() as i32);
                draw_hollow_circle_mut(&mut rgb, center, r.round().max(1.0) as i32, color);
                draw_cross_mut(&mut rgb, color, center.0, center.1);
            }
        }
        self.write(name, DynamicImage::ImageRgb8(rgb));
    }
}
