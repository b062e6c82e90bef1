use super::Histogram;
use nalgebra::{DVector, Dyn, Matrix3, OMatrix, U3, Vector3};
use scope_common::Real;
use serde::Serialize;
use thiserror::Error;

const MAX_ITERATIONS: usize = 200;
const INITIAL_DAMPING: Real = 1e-3;
const MAX_DAMPING: Real = 1e12;
const STEP_TOLERANCE: Real = 1e-10;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("Gaussian fit needs at least three non-empty bins, found {0}")]
    TooFewBins(usize),
    #[error("Cannot seed Gaussian fit from mean {mean} and sigma {sigma}")]
    DegenerateSeed { mean: Real, sigma: Real },
    #[error("Gaussian fit normal equations are singular")]
    Singular,
    #[error("Gaussian fit did not converge in {0} iterations")]
    NoConvergence(usize),
}

/// `amplitude * exp(-(x - mean)^2 / (2 sigma^2))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianFit {
    pub amplitude: Real,
    pub mean: Real,
    pub sigma: Real,
}

impl GaussianFit {
    pub fn evaluate(&self, x: Real) -> Real {
        self.amplitude * (-(x - self.mean).powi(2) / (2.0 * self.sigma.powi(2))).exp()
    }
}

/// Least-squares fit of a Gaussian to the bin counts of `histogram`, against
/// the bin centres.
///
/// The fit starts from the largest count and the given `mean` and `sigma`,
/// usually those of the histogrammed values, and is refined by
/// Levenberg-Marquardt iteration.
pub fn fit_gaussian(histogram: &Histogram, mean: Real, sigma: Real) -> Result<GaussianFit, FitError> {
    let occupied = histogram.counts().iter().filter(|&&c| c > 0).count();
    if occupied < 3 {
        return Err(FitError::TooFewBins(occupied));
    }
    if !(mean.is_finite() && sigma.is_finite() && sigma > 0.0) {
        return Err(FitError::DegenerateSeed { mean, sigma });
    }
    let peak = histogram.max_count() as Real;

    // Work in units of the seed so the parameters have similar magnitudes.
    let x = DVector::from_iterator(
        histogram.counts().len(),
        histogram
            .centres()
            .into_iter()
            .map(|centre| (centre - mean) / sigma),
    );
    let y = DVector::from_iterator(
        histogram.counts().len(),
        histogram.counts().iter().map(|&count| count as Real / peak),
    );

    let p = levenberg_marquardt(&x, &y, Vector3::new(1.0, 0.0, 1.0))?;
    Ok(GaussianFit {
        amplitude: p[0] * peak,
        mean: mean + p[1] * sigma,
        sigma: p[2].abs() * sigma,
    })
}

type Parameters = Vector3<Real>;

fn model(p: &Parameters, x: Real) -> Real {
    let (a, mu, s) = (p[0], p[1], p[2]);
    a * (-(x - mu).powi(2) / (2.0 * s * s)).exp()
}

fn cost(p: &Parameters, x: &DVector<Real>, y: &DVector<Real>) -> Real {
    x.iter().zip(y.iter()).map(|(&x, &y)| (y - model(p, x)).powi(2)).sum()
}

/// Rows of partial derivatives of the model with respect to each parameter.
fn jacobian(p: &Parameters, x: &DVector<Real>) -> OMatrix<Real, Dyn, U3> {
    let (a, mu, s) = (p[0], p[1], p[2]);
    OMatrix::<Real, Dyn, U3>::from_fn(x.len(), |row, col| {
        let d = x[row] - mu;
        let e = (-d * d / (2.0 * s * s)).exp();
        match col {
            0 => e,
            1 => a * e * d / (s * s),
            _ => a * e * d * d / s.powi(3),
        }
    })
}

/// Solves `(normal + damping * diag(normal)) step = rhs`.
fn damped_step(normal: &Matrix3<Real>, rhs: &Vector3<Real>, damping: Real) -> Option<Vector3<Real>> {
    let damped = normal + Matrix3::from_diagonal(&normal.diagonal()) * damping;
    damped
        .lu()
        .solve(rhs)
        .filter(|step| step.iter().all(|v| v.is_finite()))
}

fn levenberg_marquardt(
    x: &DVector<Real>,
    y: &DVector<Real>,
    initial: Parameters,
) -> Result<Parameters, FitError> {
    let mut p = initial;
    let mut current = cost(&p, x, y);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let j = jacobian(&p, x);
        let residuals = DVector::from_iterator(
            x.len(),
            x.iter().zip(y.iter()).map(|(&x, &y)| y - model(&p, x)),
        );
        let normal: Matrix3<Real> = j.transpose() * &j;
        let rhs: Vector3<Real> = j.transpose() * residuals;

        loop {
            let step = damped_step(&normal, &rhs, damping).ok_or(FitError::Singular)?;
            let trial = p + step;
            let trial_cost = cost(&trial, x, y);

            if trial_cost.is_finite() && trial_cost <= current {
                let converged = step
                    .iter()
                    .zip(trial.iter())
                    .all(|(d, p)| d.abs() <= STEP_TOLERANCE * (p.abs() + STEP_TOLERANCE));
                p = trial;
                current = trial_cost;
                damping = (damping / 10.0).max(Real::EPSILON);
                if converged {
                    return Ok(p);
                }
                break;
            }
            damping *= 10.0;
            if damping > MAX_DAMPING {
                // No step reduces the residual, so this is a minimum.
                return Ok(p);
            }
        }
    }
    Err(FitError::NoConvergence(MAX_ITERATIONS))
}
