use super::FeatureError;
use crate::{
    budget::{Deadline, TimingBudget},
    config::{RootFailurePolicy, RootFinding},
    numerics::{CubicSpline, NewtonSolver, RootFindError, SplineError},
};
use ndarray::{Array1, ArrayView2};
use scope_common::{NO_CROSSING_TIME, Real};
use thiserror::Error;
use tracing::warn;

/// Newton steps no larger than this fraction of the sample interval are converged.
const RELATIVE_TOLERANCE: Real = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum CrossingError {
    #[error("Root finding failed for event {event}: {source}")]
    RootFind {
        event: usize,
        #[source]
        source: RootFindError,
    },
    #[error("Time budget exhausted at event {event}")]
    Timeout { event: usize },
    #[error("Crossing fraction {0} is not in (0,1)")]
    Fraction(Real),
    #[error(transparent)]
    Spline(#[from] SplineError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Outcome of searching a single event for its threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crossing {
    Time(Real),
    /// The event peaks at its first sample so never rises through the threshold.
    NoRisingEdge,
}

impl Crossing {
    /// The value stored for the event, with the sentinel for a missing crossing.
    pub fn recorded(self) -> Real {
        match self {
            Crossing::Time(time) => time,
            Crossing::NoRisingEdge => NO_CROSSING_TIME,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct CrossingOptions {
    pub max_iterations: usize,
    pub on_failure: RootFailurePolicy,
    pub budget: TimingBudget,
}

impl From<&RootFinding> for CrossingOptions {
    fn from(settings: &RootFinding) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            on_failure: settings.on_failure,
            budget: settings.budget,
        }
    }
}

/// Finds where a single event first rises through `fraction` of its peak.
///
/// `peak` is the index and value of the event's first maximum. The search
/// starts from the sample before the peak whose interpolated value is
/// closest to the threshold, and refines it with `solver` on the spline
/// through the whole event.
pub fn crossing_time(
    spline: &CubicSpline,
    knots: &[Real],
    (peak_index, peak): (usize, Real),
    fraction: Real,
    solver: &NewtonSolver,
) -> Result<Crossing, RootFindError> {
    if peak_index == 0 {
        return Ok(Crossing::NoRisingEdge);
    }
    let threshold = fraction * peak;

    let Some(initial) = knots
        .iter()
        .take(peak_index)
        .map(|&t| (t, (spline.value(t) - threshold).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(t, _)| t)
    else {
        return Ok(Crossing::NoRisingEdge);
    };

    solver
        .solve(
            |t| spline.value(t) - threshold,
            |t| spline.derivative(t),
            initial,
        )
        .map(Crossing::Time)
}

/// Crossing time of every event, with [NO_CROSSING_TIME] for events that have none.
///
/// # Parameters
/// - waveforms: normalized voltages indexed by (event, sample).
/// - fraction: the threshold as a fraction of each event's own peak.
/// - file_deadline: shared by every channel of the capture.
///
/// # Error Modes
/// - [CrossingError::Timeout] if either deadline passes, whatever the failure policy.
/// - [CrossingError::RootFind] if the root finder fails and the policy is to abort.
#[tracing::instrument(skip_all, level = "debug", fields(events = waveforms.nrows(), not_found))]
pub fn crossing_times(
    waveforms: ArrayView2<Real>,
    fraction: Real,
    sample_interval: Real,
    options: &CrossingOptions,
    file_deadline: Deadline,
) -> Result<Array1<Real>, CrossingError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(CrossingError::Fraction(fraction));
    }
    if waveforms.ncols() == 0 {
        return Err(FeatureError::EmptyWaveform.into());
    }
    let knots: Vec<Real> = (0..waveforms.ncols())
        .map(|i| i as Real * sample_interval)
        .collect();

    let mut times = Vec::with_capacity(waveforms.nrows());
    for (event, row) in waveforms.rows().into_iter().enumerate() {
        let deadline = options.budget.event_deadline(file_deadline);
        if deadline.has_passed() {
            return Err(CrossingError::Timeout { event });
        }
        let values = row.to_vec();
        let Some(peak) = rising_peak(&values) else {
            times.push(NO_CROSSING_TIME);
            continue;
        };
        let spline = CubicSpline::new(&knots, &values)?;
        let solver = NewtonSolver::new(options.max_iterations, RELATIVE_TOLERANCE * sample_interval)
            .with_deadline(deadline);

        let time = match crossing_time(&spline, &knots, peak, fraction, &solver) {
            Ok(crossing) => crossing.recorded(),
            Err(RootFindError::DeadlineExceeded { .. }) => {
                return Err(CrossingError::Timeout { event });
            }
            Err(source) => match options.on_failure {
                RootFailurePolicy::Abort => return Err(CrossingError::RootFind { event, source }),
                RootFailurePolicy::Sentinel => {
                    warn!(event, %source, "Crossing time not found, recording sentinel");
                    NO_CROSSING_TIME
                }
            },
        };
        times.push(time);
    }

    let not_found = times.iter().filter(|&&t| t == NO_CROSSING_TIME).count();
    tracing::Span::current().record("not_found", not_found);
    Ok(Array1::from_vec(times))
}

/// The first maximum of an event, unless it is the first sample.
fn rising_peak(values: &[Real]) -> Option<(usize, Real)> {
    first_maximum(values).filter(|&(index, _)| index > 0)
}

/// Index and value of the first occurrence of the maximum, ignoring NaN.
fn first_maximum(values: &[Real]) -> Option<(usize, Real)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, v)| match best {
            Some((_, max)) if v <= max => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{Array2, array};
    use std::time::Duration;

    const SIGMA: Real = 10.0;
    const CENTRE: Real = 50.0;

    fn gaussian_pulses(events: usize) -> Array2<Real> {
        Array2::from_shape_fn((events, 101), |(_, i)| {
            (-(i as Real - CENTRE).powi(2) / (2.0 * SIGMA * SIGMA)).exp()
        })
    }

    fn options() -> CrossingOptions {
        CrossingOptions {
            max_iterations: 500,
            ..Default::default()
        }
    }

    #[test]
    fn finds_gaussian_leading_edge() {
        let pulses = gaussian_pulses(2);
        let times = crossing_times(pulses.view(), 0.2, 1.0, &options(), Deadline::never()).unwrap();
        let expected = CENTRE - SIGMA * (2.0 * Real::ln(5.0)).sqrt();
        for &time in &times {
            assert_approx_eq!(time, expected, 1e-3);
        }
    }

    #[test]
    fn scales_with_sample_interval() {
        let pulses = gaussian_pulses(1);
        let times = crossing_times(pulses.view(), 0.5, 2e-9, &options(), Deadline::never()).unwrap();
        let expected = (CENTRE - SIGMA * (2.0 * Real::ln(2.0)).sqrt()) * 2e-9;
        assert_approx_eq!(times[0], expected, 1e-12);
    }

    #[test]
    fn linear_ramp_crosses_halfway() {
        let ramp = Array2::from_shape_fn((1, 11), |(_, i)| i as Real / 10.0);
        let times = crossing_times(ramp.view(), 0.5, 0.1, &options(), Deadline::never()).unwrap();
        assert_approx_eq!(times[0], 0.5, 1e-9);
    }

    #[test]
    fn higher_fraction_crosses_later() {
        let pulses = gaussian_pulses(1);
        let times: Vec<Real> = [0.1, 0.3, 0.5, 0.7, 0.9]
            .into_iter()
            .map(|fraction| {
                crossing_times(pulses.view(), fraction, 1.0, &options(), Deadline::never())
                    .unwrap()[0]
            })
            .collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn peak_at_first_sample_has_no_rising_edge() {
        let waveforms = array![[1.0, 0.5, 0.2, 0.1], [0.0, 0.0, 0.0, 0.0]];
        let times =
            crossing_times(waveforms.view(), 0.5, 1.0, &options(), Deadline::never()).unwrap();
        assert_eq!(times, array![NO_CROSSING_TIME, NO_CROSSING_TIME]);
    }

    #[test]
    fn falling_events_are_not_interpolated() {
        // A zero interval gives knots which cannot be interpolated.
        let waveforms = array![[1.0, 0.5, 0.2, 0.1], [0.3, 0.3, 0.3, 0.3]];
        let times =
            crossing_times(waveforms.view(), 0.5, 0.0, &options(), Deadline::never()).unwrap();
        assert_eq!(times, array![NO_CROSSING_TIME, NO_CROSSING_TIME]);
    }

    #[test]
    fn peak_index_zero_has_no_rising_edge() {
        let knots = [0.0, 1.0, 2.0, 3.0];
        let values = [1.0, 0.5, 0.2, 0.1];
        let spline = CubicSpline::new(&knots, &values).unwrap();
        let solver = NewtonSolver::new(500, 1e-9);
        assert_eq!(
            crossing_time(&spline, &knots, (0, 1.0), 0.5, &solver),
            Ok(Crossing::NoRisingEdge)
        );
        assert_eq!(rising_peak(&values), None);
        assert_eq!(rising_peak(&[0.0, 1.0, 0.5]), Some((1, 1.0)));
    }

    #[test]
    fn normalized_ramp_crosses_halfway() {
        const SAMPLES: usize = 1000;
        let dt = 1.0 / (SAMPLES - 1) as Real;
        let raw = Array2::from_shape_fn((2, SAMPLES), |(event, i)| {
            0.3 * event as Real + i as Real * dt
        });
        let normalized = crate::normalize::normalize(raw.view(), 1, 1.0).unwrap();
        let times =
            crossing_times(normalized.view(), 0.5, dt, &options(), Deadline::never()).unwrap();
        for &time in &times {
            assert!((time - 0.5).abs() < dt, "{time}");
        }
    }

    #[test]
    fn rise_then_decay_crosses_later_for_higher_fraction() {
        const RISE: usize = 40;
        let pulse = Array2::from_shape_fn((1, 200), |(_, i)| {
            if i <= RISE {
                i as Real / RISE as Real
            } else {
                (-((i - RISE) as Real) / 30.0).exp()
            }
        });
        let fractions = [0.1, 0.25, 0.5, 0.75, 0.9];
        let times = fractions
            .iter()
            .map(|&fraction| {
                crossing_times(pulse.view(), fraction, 1.0, &options(), Deadline::never())
                    .unwrap()[0]
            })
            .collect::<Vec<_>>();
        assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
        for (&fraction, &time) in fractions.iter().zip(&times) {
            assert_approx_eq!(time, fraction * RISE as Real, 1e-2);
        }
    }

    #[test]
    fn no_events() {
        let waveforms = Array2::<Real>::zeros((0, 8));
        let times =
            crossing_times(waveforms.view(), 0.5, 1.0, &options(), Deadline::never()).unwrap();
        assert!(times.is_empty());
    }

    #[test]
    fn root_failure_aborts() {
        let pulses = gaussian_pulses(1);
        let options = CrossingOptions {
            max_iterations: 1,
            ..Default::default()
        };
        assert!(matches!(
            crossing_times(pulses.view(), 0.2, 1.0, &options, Deadline::never()),
            Err(CrossingError::RootFind {
                event: 0,
                source: RootFindError::IterationLimit { .. }
            })
        ));
    }

    #[test]
    fn root_failure_records_sentinel() {
        let pulses = gaussian_pulses(3);
        let options = CrossingOptions {
            max_iterations: 1,
            on_failure: RootFailurePolicy::Sentinel,
            ..Default::default()
        };
        let times = crossing_times(pulses.view(), 0.2, 1.0, &options, Deadline::never()).unwrap();
        assert_eq!(times, Array1::from_elem(3, NO_CROSSING_TIME));
    }

    #[test]
    fn expired_budget_times_out_whatever_the_policy() {
        let pulses = gaussian_pulses(2);
        let options = CrossingOptions {
            max_iterations: 500,
            on_failure: RootFailurePolicy::Sentinel,
            budget: TimingBudget {
                event: None,
                file: Some(Duration::ZERO),
            },
        };
        let file_deadline = options.budget.file_deadline();
        assert_eq!(
            crossing_times(pulses.view(), 0.2, 1.0, &options, file_deadline),
            Err(CrossingError::Timeout { event: 0 })
        );
    }

    #[test]
    fn fraction_must_be_in_unit_interval() {
        let pulses = gaussian_pulses(1);
        assert_eq!(
            crossing_times(pulses.view(), 1.0, 1.0, &options(), Deadline::never()),
            Err(CrossingError::Fraction(1.0))
        );
    }

    #[test]
    fn first_maximum_prefers_earliest() {
        assert_eq!(first_maximum(&[0.0, 2.0, 1.0, 2.0]), Some((1, 2.0)));
        assert_eq!(first_maximum(&[Real::NAN, 1.0]), Some((1, 1.0)));
        assert_eq!(first_maximum(&[]), None);
    }
}
