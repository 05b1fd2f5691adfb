/// Borrowed 8-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Owned 8-bit grayscale image, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0)
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wrap an existing buffer; `None` if its length does not match `width * height`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }
}

impl<'a> GrayImageView<'a> {
    /// True when the buffer length agrees with the declared dimensions and
    /// neither dimension is zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f64 && y <= (self.height - 1) as f64
    }

    pub fn to_owned_image(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i64, y: i64) -> f64 {
    let xc = x.clamp(0, src.width as i64 - 1) as usize;
    let yc = y.clamp(0, src.height as i64 - 1) as usize;
    src.data[yc * src.width + xc] as f64
}

/// Bilinear sample; pixels outside the image read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f64, y: f64) -> u8 {
    sample_bilinear(src, x, y).round().clamp(0.0, 255.0) as u8
}

/// Bilinear sample that refuses coordinates outside the image.
#[inline]
pub fn sample_bilinear_checked(src: &GrayImageView<'_>, x: f64, y: f64) -> Option<f64> {
    src.contains(x, y).then(|| sample_bilinear(src, x, y))
}

#[inline]
fn cubic_weight(t: f64) -> f64 {
    // Catmull-Rom (a = -0.5)
    let a = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (a + 2.0) * t * t * t - (a + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        a * t * t * t - 5.0 * a * t * t + 8.0 * a * t - 4.0 * a
    } else {
        0.0
    }
}

/// Bicubic sample with edge replication.
pub fn sample_bicubic(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let mut acc = 0.0;
    for j in -1..=2_i64 {
        let wy = cubic_weight(fy - j as f64);
        let mut row = 0.0;
        for i in -1..=2_i64 {
            row += cubic_weight(fx - i as f64) * get_gray_clamped(src, x0 + i, y0 + j);
        }
        acc += wy * row;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.set(x, y, (x * 10 + y) as u8);
            }
        }
        img
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = ramp(8, 8);
        let v = sample_bilinear(&img.view(), 2.5, 3.0);
        assert!((v - 28.0).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn checked_sampling_rejects_outside() {
        let img = ramp(8, 8);
        assert!(sample_bilinear_checked(&img.view(), -0.5, 2.0).is_none());
        assert!(sample_bilinear_checked(&img.view(), 7.0, 7.0).is_some());
    }

    #[test]
    fn bicubic_reproduces_linear_ramp() {
        let img = ramp(10, 10);
        let v = sample_bicubic(&img.view(), 4.25, 5.0);
        assert!((v - 47.5).abs() < 1e-6, "got {v}");
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(GrayImage::from_raw(4, 4, vec![0; 15]).is_none());
        let img = GrayImage::from_raw(4, 4, vec![7; 16]).expect("valid buffer");
        assert!(img.view().is_valid());
    }
}
