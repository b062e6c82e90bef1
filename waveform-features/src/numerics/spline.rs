use scope_common::Real;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SplineError {
    #[error("Cannot interpolate through zero points")]
    Empty,
    #[error("Spline has {knots} knots but {values} values")]
    LengthMismatch { knots: usize, values: usize },
    #[error("Knots are not strictly increasing at index {0}")]
    NotIncreasing(usize),
}

/// Interpolating cubic spline with not-a-knot end conditions.
///
/// With four or more knots the third derivative is continuous across the
/// second and penultimate knots. Three knots give the interpolating parabola,
/// two a straight line and one a constant. Outside the knots the spline is
/// extended by the cubic of the nearest end segment.
#[derive(Debug, Clone)]
pub struct CubicSpline<'a> {
    knots: &'a [Real],
    values: &'a [Real],
    /// Second derivative at each knot.
    curvature: Vec<Real>,
}

impl<'a> CubicSpline<'a> {
    pub fn new(knots: &'a [Real], values: &'a [Real]) -> Result<Self, SplineError> {
        if knots.len() != values.len() {
            return Err(SplineError::LengthMismatch {
                knots: knots.len(),
                values: values.len(),
            });
        }
        if knots.is_empty() {
            return Err(SplineError::Empty);
        }
        if let Some(index) = knots.windows(2).position(|w| !(w[0] < w[1])) {
            return Err(SplineError::NotIncreasing(index + 1));
        }
        let curvature = not_a_knot_curvature(knots, values);
        Ok(Self {
            knots,
            values,
            curvature,
        })
    }

    pub fn value(&self, x: Real) -> Real {
        match self.segment(x) {
            Some(segment) => segment.value(x),
            None => self.values.first().copied().unwrap_or_default(),
        }
    }

    pub fn derivative(&self, x: Real) -> Real {
        self.segment(x).map(|segment| segment.derivative(x)).unwrap_or_default()
    }

    /// The segment containing `x`, or None for a single-knot spline.
    fn segment(&self, x: Real) -> Option<Segment> {
        let last = self.knots.len().checked_sub(2)?;
        let index = self
            .knots
            .partition_point(|&knot| knot <= x)
            .saturating_sub(1)
            .min(last);
        Some(Segment {
            x0: *self.knots.get(index)?,
            x1: *self.knots.get(index + 1)?,
            y0: *self.values.get(index)?,
            y1: *self.values.get(index + 1)?,
            m0: *self.curvature.get(index)?,
            m1: *self.curvature.get(index + 1)?,
        })
    }
}

struct Segment {
    x0: Real,
    x1: Real,
    y0: Real,
    y1: Real,
    m0: Real,
    m1: Real,
}

impl Segment {
    fn value(&self, x: Real) -> Real {
        let h = self.x1 - self.x0;
        let (a, b) = (self.x1 - x, x - self.x0);
        self.m0 * a.powi(3) / (6.0 * h)
            + self.m1 * b.powi(3) / (6.0 * h)
            + (self.y0 / h - self.m0 * h / 6.0) * a
            + (self.y1 / h - self.m1 * h / 6.0) * b
    }

    fn derivative(&self, x: Real) -> Real {
        let h = self.x1 - self.x0;
        let (a, b) = (self.x1 - x, x - self.x0);
        -self.m0 * a.powi(2) / (2.0 * h) + self.m1 * b.powi(2) / (2.0 * h)
            + (self.y1 - self.y0) / h
            - (self.m1 - self.m0) * h / 6.0
    }
}

/// Solves for the second derivative at every knot.
fn not_a_knot_curvature(x: &[Real], y: &[Real]) -> Vec<Real> {
    let n = x.len();
    let h: Vec<Real> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let slope: Vec<Real> = y
        .windows(2)
        .zip(&h)
        .map(|(w, h)| (w[1] - w[0]) / h)
        .collect();

    match (n, h.as_slice(), slope.as_slice()) {
        (3, &[h0, h1], &[s0, s1]) => vec![2.0 * (s1 - s0) / (h0 + h1); 3],
        (4.., _, _) => interior_curvature(&h, &slope),
        _ => vec![0.0; n],
    }
}

/// Not-a-knot system for four or more knots. The end curvatures are
/// eliminated from the first and last rows, leaving a tridiagonal system in
/// the interior curvatures.
fn interior_curvature(h: &[Real], slope: &[Real]) -> Vec<Real> {
    let n = h.len() + 1;
    let interior = n - 2;

    let mut lower = vec![0.0; interior];
    let mut diagonal = vec![0.0; interior];
    let mut upper = vec![0.0; interior];
    let mut rhs = vec![0.0; interior];

    for row in 0..interior {
        let (h_prev, h_next) = (h[row], h[row + 1]);
        lower[row] = h_prev;
        diagonal[row] = 2.0 * (h_prev + h_next);
        upper[row] = h_next;
        rhs[row] = 6.0 * (slope[row + 1] - slope[row]);
    }

    let (h0, h1) = (h[0], h[1]);
    diagonal[0] = (h0 + h1) * (h0 + 2.0 * h1) / h1;
    upper[0] = (h1 * h1 - h0 * h0) / h1;

    let (a, b) = (h[n - 3], h[n - 2]);
    lower[interior - 1] = (a * a - b * b) / a;
    diagonal[interior - 1] = (a + b) * (2.0 * a + b) / a;

    let inner = solve_tridiagonal(&lower, &mut diagonal, &upper, &mut rhs);

    let first = ((h0 + h1) * inner[0] - h0 * inner[1]) / h1;
    let last = ((a + b) * inner[interior - 1] - b * inner[interior - 2]) / a;

    let mut curvature = Vec::with_capacity(n);
    curvature.push(first);
    curvature.extend_from_slice(&inner);
    curvature.push(last);
    curvature
}

/// Thomas algorithm. `lower[0]` and `upper[last]` are ignored.
fn solve_tridiagonal(
    lower: &[Real],
    diagonal: &mut [Real],
    upper: &[Real],
    rhs: &mut [Real],
) -> Vec<Real> {
    let n = diagonal.len();
    for i in 1..n {
        let w = lower[i] / diagonal[i - 1];
        diagonal[i] -= w * upper[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    let mut solution = vec![0.0; n];
    solution[n - 1] = rhs[n - 1] / diagonal[n - 1];
    for i in (0..n - 1).rev() {
        solution[i] = (rhs[i] - upper[i] * solution[i + 1]) / diagonal[i];
    }
    solution
}
