use crate::budget::Deadline;
use scope_common::Real;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RootFindError {
    #[error("No convergence after {iterations} iterations (last estimate {estimate})")]
    IterationLimit { iterations: usize, estimate: Real },
    #[error("Derivative vanished at {at}")]
    ZeroDerivative { at: Real },
    #[error("Iterate became non-finite after {iterations} iterations")]
    NonFinite { iterations: usize },
    #[error("Deadline passed after {iterations} iterations")]
    DeadlineExceeded { iterations: usize },
}

/// Newton-Raphson iteration with an analytic derivative.
#[derive(Debug, Clone, Copy)]
pub struct NewtonSolver {
    max_iterations: usize,
    tolerance: Real,
    deadline: Deadline,
}

impl NewtonSolver {
    /// # Parameters
    /// - max_iterations: the iteration cap.
    /// - tolerance: iteration stops once a step is no larger than this.
    pub fn new(max_iterations: usize, tolerance: Real) -> Self {
        Self {
            max_iterations,
            tolerance,
            deadline: Deadline::never(),
        }
    }

    pub fn with_deadline(self, deadline: Deadline) -> Self {
        Self { deadline, ..self }
    }

    /// Finds a root of `f` starting from `initial`.
    pub fn solve<F, D>(&self, f: F, derivative: D, initial: Real) -> Result<Real, RootFindError>
    where
        F: Fn(Real) -> Real,
        D: Fn(Real) -> Real,
    {
        let mut x = initial;
        for iteration in 0..self.max_iterations {
            if self.deadline.has_passed() {
                return Err(RootFindError::DeadlineExceeded {
                    iterations: iteration,
                });
            }
            let value = f(x);
            if value == 0.0 {
                return Ok(x);
            }
            let slope = derivative(x);
            if slope == 0.0 {
                return Err(RootFindError::ZeroDerivative { at: x });
            }
            let step = value / slope;
            x -= step;
            if !x.is_finite() {
                return Err(RootFindError::NonFinite {
                    iterations: iteration + 1,
                });
            }
            if step.abs() <= self.tolerance {
                return Ok(x);
            }
        }
        Err(RootFindError::IterationLimit {
            iterations: self.max_iterations,
            estimate: x,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;

    #[test]
    fn square_root_of_two() {
        let solver = NewtonSolver::new(50, 1e-12);
        let root = solver.solve(|x| x * x - 2.0, |x| 2.0 * x, 1.0).unwrap();
        assert_approx_eq!(root, Real::sqrt(2.0), 1e-12);
    }

    #[test]
    fn exact_initial_guess() {
        let solver = NewtonSolver::new(1, 1e-12);
        assert_eq!(solver.solve(|x| x - 3.0, |_| 1.0, 3.0), Ok(3.0));
    }

    #[test]
    fn flat_function() {
        let solver = NewtonSolver::new(10, 1e-12);
        assert_eq!(
            solver.solve(|_| 1.0, |_| 0.0, 0.5),
            Err(RootFindError::ZeroDerivative { at: 0.5 })
        );
    }

    #[test]
    fn no_real_root_hits_iteration_limit() {
        let solver = NewtonSolver::new(20, 1e-12);
        assert!(matches!(
            solver.solve(|x| x * x + 1.0, |x| 2.0 * x, 0.3),
            Err(RootFindError::IterationLimit { iterations: 20, .. })
        ));
    }

    #[test]
    fn non_finite_iterate() {
        let solver = NewtonSolver::new(10, 1e-12);
        assert_eq!(
            solver.solve(|_| 1e10, |_| Real::MIN_POSITIVE, 0.0),
            Err(RootFindError::NonFinite { iterations: 1 })
        );
    }

    #[test]
    fn expired_deadline() {
        let solver = NewtonSolver::new(10, 1e-12)
            .with_deadline(Deadline::after(Some(Duration::ZERO)));
        assert_eq!(
            solver.solve(|x| x - 1.0, |_| 1.0, 0.0),
            Err(RootFindError::DeadlineExceeded { iterations: 0 })
        );
    }
}
