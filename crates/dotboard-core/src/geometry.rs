//! Small planar geometry helpers: infinite lines, quadrilaterals and
//! polygon moments.

use nalgebra::{Point2, Vector2};

/// Infinite line in normal form `n . p = c` with `|n| = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line2 {
    pub normal: Vector2<f64>,
    pub offset: f64,
}

impl Line2 {
    /// Line through two distinct points.
    pub fn through(a: Point2<f64>, b: Point2<f64>) -> Option<Self> {
        let d = b - a;
        let len = d.norm();
        if len < 1e-12 {
            return None;
        }
        let normal = Vector2::new(-d.y, d.x) / len;
        Some(Self {
            normal,
            offset: normal.dot(&a.coords),
        })
    }

    /// Line from the polar form `x cos(theta) + y sin(theta) = r`.
    pub fn from_polar(r: f64, theta: f64) -> Self {
        Self {
            normal: Vector2::new(theta.cos(), theta.sin()),
            offset: r,
        }
    }

    /// Total least-squares fit through at least two points.
    pub fn fit(points: &[Point2<f64>]) -> Option<Self> {
        let c = centroid(points)?;
        if points.len() < 2 {
            return None;
        }
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for p in points {
            let d = p - c;
            sxx += d.x * d.x;
            syy += d.y * d.y;
            sxy += d.x * d.y;
        }
        if sxx + syy < 1e-12 {
            return None;
        }
        let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
        let dir = Vector2::new(theta.cos(), theta.sin());
        let normal = Vector2::new(-dir.y, dir.x);
        Some(Self {
            normal,
            offset: normal.dot(&c.coords),
        })
    }

    /// Foot of the perpendicular from `p`.
    pub fn project(&self, p: Point2<f64>) -> Point2<f64> {
        p - self.normal * self.signed_distance(p)
    }

    /// Unit direction along the line.
    #[inline]
    pub fn direction(&self) -> Vector2<f64> {
        Vector2::new(self.normal.y, -self.normal.x)
    }

    /// Signed distance of `p` from the line.
    #[inline]
    pub fn signed_distance(&self, p: Point2<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.offset
    }

    /// Orientation of the line direction folded into `[0, pi)`.
    pub fn angle(&self) -> f64 {
        let d = self.direction();
        d.y.atan2(d.x).rem_euclid(std::f64::consts::PI)
    }

    pub fn intersect(&self, other: &Line2) -> Option<Point2<f64>> {
        let det = self.normal.x * other.normal.y - self.normal.y * other.normal.x;
        if det.abs() < 1e-9 {
            return None;
        }
        let x = (self.offset * other.normal.y - self.normal.y * other.offset) / det;
        let y = (self.normal.x * other.offset - self.offset * other.normal.x) / det;
        Some(Point2::new(x, y))
    }
}

/// Smallest difference between two undirected orientations, in `[0, pi/2]`.
pub fn orientation_difference(a: f64, b: f64) -> f64 {
    let pi = std::f64::consts::PI;
    let d = (a - b).rem_euclid(pi);
    d.min(pi - d)
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left
/// using coordinate sums and differences.
pub fn order_quad_corners(pts: &[Point2<f64>; 4]) -> [Point2<f64>; 4] {
    let by = |key: &dyn Fn(&Point2<f64>) -> f64, max: bool| -> Point2<f64> {
        let mut best = pts[0];
        for p in pts.iter().skip(1) {
            let better = if max { key(p) > key(&best) } else { key(p) < key(&best) };
            if better {
                best = *p;
            }
        }
        best
    };
    let tl = by(&|p| p.x + p.y, false);
    let br = by(&|p| p.x + p.y, true);
    let tr = by(&|p| p.x - p.y, true);
    let bl = by(&|p| p.y - p.x, true);
    [tl, tr, br, bl]
}

/// Order four corners cyclically around their centroid, starting from the
/// corner with the smallest `x + y`. Robust for quads rotated near 45 degrees
/// where [`order_quad_corners`] can pick the same point twice.
pub fn order_quad_cyclic(pts: &[Point2<f64>; 4]) -> [Point2<f64>; 4] {
    let c = Point2::from(pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / 4.0);
    let mut sorted = *pts;
    // atan2 grows clockwise on screen because image y points down.
    sorted.sort_by(|a, b| {
        let ta = (a.y - c.y).atan2(a.x - c.x);
        let tb = (b.y - c.y).atan2(b.x - c.x);
        ta.total_cmp(&tb)
    });
    let start = (0..4)
        .min_by(|&i, &j| {
            let si = sorted[i].x + sorted[i].y;
            let sj = sorted[j].x + sorted[j].y;
            si.total_cmp(&sj)
        })
        .unwrap_or(0);
    [
        sorted[start],
        sorted[(start + 1) % 4],
        sorted[(start + 2) % 4],
        sorted[(start + 3) % 4],
    ]
}

/// Convex hull by Andrew's monotone chain; collinear points are dropped.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let cross = |o: Point2<f64>, a: Point2<f64>, b: Point2<f64>| (a - o).perp(&(b - o));

    let mut lower: Vec<Point2<f64>> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

pub fn perimeter(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| (pts[(i + 1) % n] - pts[i]).norm()).sum()
}

fn point_segment_distance(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 < 1e-18 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn douglas_peucker(pts: &[Point2<f64>], eps: f64, out: &mut Vec<Point2<f64>>) {
    // Emits every kept point except the last one.
    let n = pts.len();
    if n < 2 {
        out.extend_from_slice(pts);
        return;
    }
    let (a, b) = (pts[0], pts[n - 1]);
    let mut best = (0, 0.0);
    for (i, &p) in pts.iter().enumerate().take(n - 1).skip(1) {
        let d = point_segment_distance(p, a, b);
        if d > best.1 {
            best = (i, d);
        }
    }
    if best.1 > eps {
        douglas_peucker(&pts[..=best.0], eps, out);
        douglas_peucker(&pts[best.0..], eps, out);
    } else {
        out.push(a);
    }
}

/// Douglas-Peucker simplification of a closed polygon.
///
/// The ring is split at the vertex farthest from the first one so that
/// neither half degenerates into a zero-length chord.
pub fn simplify_closed_polygon(pts: &[Point2<f64>], eps: f64) -> Vec<Point2<f64>> {
    let n = pts.len();
    if n < 3 || eps <= 0.0 {
        return pts.to_vec();
    }
    let far = (1..n)
        .max_by(|&i, &j| {
            let di = (pts[i] - pts[0]).norm_squared();
            let dj = (pts[j] - pts[0]).norm_squared();
            di.total_cmp(&dj)
        })
        .unwrap_or(n / 2);
    let mut second: Vec<Point2<f64>> = pts[far..].to_vec();
    second.push(pts[0]);
    let mut out = Vec::new();
    douglas_peucker(&pts[..=far], eps, &mut out);
    douglas_peucker(&second, eps, &mut out);
    out
}

/// Signed shoelace area (positive for counter-clockwise in a y-up frame).
pub fn signed_polygon_area(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

pub fn polygon_area(pts: &[Point2<f64>]) -> f64 {
    signed_polygon_area(pts).abs()
}

pub fn centroid(pts: &[Point2<f64>]) -> Option<Point2<f64>> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let s = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
    Some(Point2::from(s / n))
}

/// True when every turn of the closed polygon has the same sign. Polygons
/// with a repeated vertex are never convex.
pub fn is_convex(pts: &[Point2<f64>]) -> bool {
    let n = pts.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0_f64;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        let c = pts[(i + 2) % n];
        if (b - a).norm_squared() < 1e-18 {
            return false;
        }
        let cross = (b - a).perp(&(c - b));
        if cross.abs() < 1e-12 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

/// Even-odd point-in-polygon test.
pub fn point_in_polygon(p: Point2<f64>, poly: &[Point2<f64>]) -> bool {
    let n = poly.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let a = poly[i];
        let b = poly[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Area moments of a simple polygon, computed with Green's theorem.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PolygonMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

impl PolygonMoments {
    pub fn of(pts: &[Point2<f64>]) -> Self {
        let n = pts.len();
        let mut m = PolygonMoments::default();
        if n < 3 {
            return m;
        }
        for i in 0..n {
            let (x0, y0) = (pts[i].x, pts[i].y);
            let (x1, y1) = (pts[(i + 1) % n].x, pts[(i + 1) % n].y);
            let a = x0 * y1 - x1 * y0;
            m.m00 += a;
            m.m10 += a * (x0 + x1);
            m.m01 += a * (y0 + y1);
            m.m20 += a * (x0 * x0 + x0 * x1 + x1 * x1);
            m.m11 += a * (2.0 * x0 * y0 + x0 * y1 + x1 * y0 + 2.0 * x1 * y1);
            m.m02 += a * (y0 * y0 + y0 * y1 + y1 * y1);
        }
        m.m00 /= 2.0;
        m.m10 /= 6.0;
        m.m01 /= 6.0;
        m.m20 /= 12.0;
        m.m11 /= 24.0;
        m.m02 /= 12.0;
        if m.m00 < 0.0 {
            m.m00 = -m.m00;
            m.m10 = -m.m10;
            m.m01 = -m.m01;
            m.m20 = -m.m20;
            m.m11 = -m.m11;
            m.m02 = -m.m02;
        }
        m
    }

    pub fn area(&self) -> f64 {
        self.m00
    }

    pub fn centroid(&self) -> Option<Point2<f64>> {
        (self.m00 > 1e-12).then(|| Point2::new(self.m10 / self.m00, self.m01 / self.m00))
    }

    /// Ratio of the minor to the major eigenvalue of the central second moments.
    pub fn inertia_ratio(&self) -> f64 {
        let Some(c) = self.centroid() else {
            return 0.0;
        };
        let mu20 = self.m20 / self.m00 - c.x * c.x;
        let mu02 = self.m02 / self.m00 - c.y * c.y;
        let mu11 = self.m11 / self.m00 - c.x * c.y;
        let half_trace = 0.5 * (mu20 + mu02);
        let disc = (0.25 * (mu20 - mu02).powi(2) + mu11 * mu11).sqrt();
        let major = half_trace + disc;
        let minor = half_trace - disc;
        if major <= 1e-12 {
            return 0.0;
        }
        (minor / major).clamp(0.0, 1.0)
    }
}
