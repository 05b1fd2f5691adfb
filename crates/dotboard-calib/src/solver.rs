//! Levenberg-Marquardt refinement of intrinsics, distortion and per-view
//! poses by minimizing pixel reprojection error.
//!
//! The Jacobian is built block by block: intrinsics couple to every view,
//! while each pose only touches its own 2·n residuals.

use crate::camera::CameraModel;
use crate::error::CalibrationError;
use crate::init::Pose;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use lm_nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use log::debug;
use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const POSE_PARAMS: usize = 6;
/// Residual assigned to points that project behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

/// Stopping rules for the least-squares solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Evaluation budget is `max_iterations · (parameters + 1)`.
    pub max_iterations: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns.
    pub gtol: f64,
    /// Initial trust-region bound, relative to the scaled parameters.
    pub stepbound: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-15,
            stepbound: 100.0,
        }
    }
}

/// One view's correspondences.
#[derive(Clone, Copy, Debug)]
pub struct ViewData<'a> {
    pub object: &'a [Point3<f64>],
    pub image: &'a [Point2<f64>],
}

/// Result of a solve.
#[derive(Clone, Debug)]
pub struct Solution {
    pub camera: CameraModel,
    pub poses: Vec<Pose>,
    /// `sqrt(sum |e|^2 / points)` in pixels.
    pub rms: f64,
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    pub converged: bool,
}

fn intrinsic_params(camera: &CameraModel) -> Vec<f64> {
    let mut p = vec![camera.fx, camera.fy, camera.cx, camera.cy];
    p.extend_from_slice(&camera.distortion[..camera.model.len()]);
    p
}

fn camera_from(base: &CameraModel, p: &[f64]) -> CameraModel {
    let mut cam = base.clone();
    cam.fx = p[0];
    cam.fy = p[1];
    cam.cx = p[2];
    cam.cy = p[3];
    cam.distortion[..p.len() - 4].copy_from_slice(&p[4..]);
    cam
}

fn pose_from(p: &[f64]) -> Pose {
    Pose {
        rvec: Vector3::new(p[0], p[1], p[2]),
        t: Vector3::new(p[3], p[4], p[5]),
    }
}

fn view_residuals(camera: &CameraModel, pose: &Pose, view: &ViewData<'_>, out: &mut Vec<f64>) {
    out.clear();
    for (obj, img) in view.object.iter().zip(view.image) {
        match camera.project_posed(&pose.rvec, &pose.t, obj) {
            Some(p) => {
                out.push(p.x - img.x);
                out.push(p.y - img.y);
            }
            None => {
                out.push(BEHIND_CAMERA_RESIDUAL);
                out.push(BEHIND_CAMERA_RESIDUAL);
            }
        }
    }
}

#[inline]
fn step_for(x: f64) -> f64 {
    1e-6 * x.abs().max(1.0)
}

/// Joint calibration problem; parameters are
/// `[fx fy cx cy distortion.. | rvec t]` with one pose block per view.
struct CalibrationProblem<'a> {
    base: &'a CameraModel,
    views: &'a [ViewData<'a>],
    n_intr: usize,
    n_residuals: usize,
    params: DVector<f64>,
}

impl CalibrationProblem<'_> {
    fn n_params(&self) -> usize {
        self.n_intr + POSE_PARAMS * self.views.len()
    }

    fn split(&self) -> (CameraModel, Vec<Pose>) {
        let x = self.params.as_slice();
        let cam = camera_from(self.base, &x[..self.n_intr]);
        let poses = x[self.n_intr..].chunks_exact(POSE_PARAMS).map(pose_from).collect();
        (cam, poses)
    }

    fn sum_of_squares(&self) -> Option<f64> {
        let r = self.residuals()?;
        Some(r.norm_squared())
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CalibrationProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let (cam, poses) = self.split();
        let mut all = Vec::with_capacity(self.n_residuals);
        let mut r = Vec::new();
        for (view, pose) in self.views.iter().zip(&poses) {
            view_residuals(&cam, pose, view, &mut r);
            all.extend_from_slice(&r);
        }
        all.iter()
            .all(|v| v.is_finite())
            .then(|| DVector::from_vec(all))
    }

    /// Central differences, one view block at a time.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let ni = self.n_intr;
        let x = self.params.as_slice();
        let intr = &x[..ni];
        let mut jac = DMatrix::zeros(self.n_residuals, self.n_params());
        let (mut rp, mut rm) = (Vec::new(), Vec::new());
        let mut row = 0;

        for (v, view) in self.views.iter().enumerate() {
            let off = ni + POSE_PARAMS * v;
            let pose_p = &x[off..off + POSE_PARAMS];
            let pose = pose_from(pose_p);
            let cam = camera_from(self.base, intr);
            let m = 2 * view.object.len();

            let mut p_intr = intr.to_vec();
            for k in 0..ni {
                let h = step_for(p_intr[k]);
                let orig = p_intr[k];
                p_intr[k] = orig + h;
                view_residuals(&camera_from(self.base, &p_intr), &pose, view, &mut rp);
                p_intr[k] = orig - h;
                view_residuals(&camera_from(self.base, &p_intr), &pose, view, &mut rm);
                p_intr[k] = orig;
                for i in 0..m {
                    jac[(row + i, k)] = (rp[i] - rm[i]) / (2.0 * h);
                }
            }
            let mut p_pose = pose_p.to_vec();
            for k in 0..POSE_PARAMS {
                let h = step_for(p_pose[k]);
                let orig = p_pose[k];
                p_pose[k] = orig + h;
                view_residuals(&cam, &pose_from(&p_pose), view, &mut rp);
                p_pose[k] = orig - h;
                view_residuals(&cam, &pose_from(&p_pose), view, &mut rm);
                p_pose[k] = orig;
                for i in 0..m {
                    jac[(row + i, off + k)] = (rp[i] - rm[i]) / (2.0 * h);
                }
            }
            row += m;
        }
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

/// Refine `camera` and `poses` jointly over `views`.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(views = views.len())))]
pub fn refine(
    camera: &CameraModel,
    poses: &[Pose],
    views: &[ViewData<'_>],
    opts: &SolverOptions,
) -> Result<Solution, CalibrationError> {
    if poses.len() != views.len() {
        return Err(CalibrationError::Solver(format!(
            "{} poses for {} views",
            poses.len(),
            views.len()
        )));
    }
    let mut base = camera.clone();
    base.clamp_to_model();
    let n_points: usize = views.iter().map(|v| v.object.len().min(v.image.len())).sum();
    if n_points == 0 {
        return Err(CalibrationError::Solver("no points to fit".to_string()));
    }
    if views.iter().any(|v| v.object.len() != v.image.len()) {
        return Err(CalibrationError::Solver(
            "object and image point counts differ".to_string(),
        ));
    }

    let mut x = intrinsic_params(&base);
    for p in poses {
        x.extend(p.rvec.iter().chain(p.t.iter()));
    }
    let problem = CalibrationProblem {
        base: &base,
        views,
        n_intr: 4 + base.model.len(),
        n_residuals: 2 * n_points,
        params: DVector::from_vec(x),
    };
    if problem.sum_of_squares().is_none() {
        return Err(CalibrationError::Solver("initial cost is not finite".to_string()));
    }

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_stepbound(opts.stepbound)
        .with_patience(opts.max_iterations.max(1));
    let (problem, report) = lm.minimize(problem);

    let cost = problem
        .sum_of_squares()
        .ok_or_else(|| CalibrationError::Solver(format!("{:?}", report.termination)))?;
    let (cam, poses) = problem.split();
    let rms = (cost / n_points as f64).sqrt();
    debug!(
        "lm stopped after {} evaluations ({:?}), rms {rms:.4} px",
        report.number_of_evaluations, report.termination
    );
    if !cam.fx.is_finite() || !cam.fy.is_finite() || cam.fx <= 0.0 || cam.fy <= 0.0 {
        return Err(CalibrationError::Solver(format!(
            "focal lengths diverged to ({}, {})",
            cam.fx, cam.fy
        )));
    }
    Ok(Solution {
        camera: cam,
        poses,
        rms,
        iterations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    })
}
