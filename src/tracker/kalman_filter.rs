//! Constant-velocity Kalman filter over XYAH boxes.
//!
//! State is `[cx, cy, a, h, vcx, vcy, va, vh]` with velocities in units per
//! second. Process noise scales with box height and with the elapsed time
//! expressed in nominal frames, so a track coasting across a dropped frame
//! grows its uncertainty twice as fast as one updated every frame.

use ndarray::{Array1, Array2};
use thiserror::Error;

const NDIM: usize = 4;
const STATE_DIM: usize = 2 * NDIM;
const MIN_VARIANCE: f64 = 1e-9;
const MIN_HEIGHT: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("innovation covariance is not positive definite")]
    SingularInnovation,
    #[error("measurement contains non-finite values")]
    NonFiniteMeasurement,
}

/// Noise parameters shared by every track of one tracker.
#[derive(Debug, Clone, Copy)]
pub struct NoiseModel {
    /// Position standard deviation as a fraction of box height.
    pub std_weight_position: f64,
    /// Velocity standard deviation per frame as a fraction of box height.
    pub std_weight_velocity: f64,
    /// Frames per second the weights above were tuned for.
    pub frame_rate: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
            frame_rate: 30.0,
        }
    }
}

/// Per-track filter; each track owns exactly one.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    noise: NoiseModel,
}

impl KalmanFilter {
    /// Start a filter at an XYAH measurement with zero velocity.
    pub fn initiate(measurement: [f64; 4], noise: NoiseModel) -> Self {
        let mut mean = Array1::zeros(STATE_DIM);
        for (i, &m) in measurement.iter().enumerate() {
            mean[i] = m;
        }

        let h = measurement[3].max(MIN_HEIGHT);
        let fr = noise.frame_rate;
        let std = [
            2.0 * noise.std_weight_position * h,
            2.0 * noise.std_weight_position * h,
            1e-2,
            2.0 * noise.std_weight_position * h,
            10.0 * noise.std_weight_velocity * h * fr,
            10.0 * noise.std_weight_velocity * h * fr,
            1e-5 * fr,
            10.0 * noise.std_weight_velocity * h * fr,
        ];

        Self {
            mean,
            covariance: diag_squared(&std),
            noise,
        }
    }

    /// State mean `[cx, cy, a, h, vcx, vcy, va, vh]`.
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// 8x8 state covariance, symmetric positive definite.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Current XYAH estimate.
    pub fn measurement_estimate(&self) -> [f64; 4] {
        [self.mean[0], self.mean[1], self.mean[2], self.mean[3]]
    }

    /// Box center in pixels.
    pub fn position(&self) -> [f64; 2] {
        [self.mean[0], self.mean[1]]
    }

    /// Box center velocity in pixels per second.
    pub fn velocity(&self) -> [f64; 2] {
        [self.mean[4], self.mean[5]]
    }

    fn motion_mat(dt: f64) -> Array2<f64> {
        let mut f = Array2::eye(STATE_DIM);
        for i in 0..NDIM {
            f[[i, NDIM + i]] = dt;
        }
        f
    }

    fn update_mat() -> Array2<f64> {
        let mut h = Array2::zeros((NDIM, STATE_DIM));
        for i in 0..NDIM {
            h[[i, i]] = 1.0;
        }
        h
    }

    fn measurement_noise(&self) -> Array2<f64> {
        let h = self.mean[3].max(MIN_HEIGHT);
        let w = self.noise.std_weight_position * h;
        diag_squared(&[w, w, 1e-1, w])
    }

    /// Propagate the state `dt` seconds forward.
    pub fn predict(&mut self, dt: f64) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let steps = dt * self.noise.frame_rate;
        let h = self.mean[3].max(MIN_HEIGHT);
        let fr = self.noise.frame_rate;
        let std = [
            self.noise.std_weight_position * h,
            self.noise.std_weight_position * h,
            1e-2,
            self.noise.std_weight_position * h,
            self.noise.std_weight_velocity * h * fr,
            self.noise.std_weight_velocity * h * fr,
            1e-5 * fr,
            self.noise.std_weight_velocity * h * fr,
        ];
        let motion_cov = diag_squared(&std) * steps;

        let f = Self::motion_mat(dt);
        self.mean = f.dot(&self.mean);
        self.covariance = f.dot(&self.covariance).dot(&f.t()) + motion_cov;
        self.stabilize();
    }

    /// Project the state into measurement space: `(H x, H P H^T + R)`.
    pub fn project(&self) -> (Array1<f64>, Array2<f64>) {
        let h = Self::update_mat();
        let mean = h.dot(&self.mean);
        let cov = h.dot(&self.covariance).dot(&h.t()) + self.measurement_noise();
        (mean, cov)
    }

    /// Correct the state with an XYAH measurement.
    pub fn update(&mut self, measurement: [f64; 4]) -> Result<(), FilterError> {
        if measurement.iter().any(|m| !m.is_finite()) {
            return Err(FilterError::NonFiniteMeasurement);
        }

        let (projected_mean, projected_cov) = self.project();
        let s_inv = invert_spd_4x4(&projected_cov)?;

        let h = Self::update_mat();
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;
        let kalman_gain = self.covariance.dot(&h.t()).dot(&s_inv);

        self.mean = &self.mean + &kalman_gain.dot(&innovation);

        // Joseph form keeps P symmetric positive semi-definite.
        let i_kh = Array2::<f64>::eye(STATE_DIM) - kalman_gain.dot(&h);
        let r = self.measurement_noise();
        self.covariance =
            i_kh.dot(&self.covariance).dot(&i_kh.t()) + kalman_gain.dot(&r).dot(&kalman_gain.t());
        self.stabilize();
        Ok(())
    }

    fn stabilize(&mut self) {
        let sym = (&self.covariance + &self.covariance.t()) * 0.5;
        self.covariance = sym;
        for i in 0..STATE_DIM {
            let v = self.covariance[[i, i]];
            if !v.is_finite() || v < MIN_VARIANCE {
                self.covariance[[i, i]] = MIN_VARIANCE;
            }
        }
    }
}

fn diag_squared(std: &[f64]) -> Array2<f64> {
    let mut m = Array2::zeros((std.len(), std.len()));
    for (i, s) in std.iter().enumerate() {
        m[[i, i]] = s * s;
    }
    m
}

/// Invert a symmetric positive-definite 4x4 matrix via nalgebra's Cholesky.
fn invert_spd_4x4(m: &Array2<f64>) -> Result<Array2<f64>, FilterError> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm
        .cholesky()
        .ok_or(FilterError::SingularInnovation)?
        .inverse();
    Ok(Array2::from_shape_fn((NDIM, NDIM), |(i, j)| inv[(i, j)]))
}
