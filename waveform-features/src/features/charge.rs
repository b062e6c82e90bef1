use super::FeatureError;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis, s};
use scope_common::Real;

/// Charge collected in each event.
///
/// Each event's voltage is integrated over its full sample grid with [simpson]
/// and converted to charge by `charge_norm / transconductance`. With the
/// transconductance in ohms and `charge_norm = 1e15` the result is in fC.
pub fn charge(
    waveforms: ArrayView2<Real>,
    sample_interval: Real,
    transconductance: Real,
    charge_norm: Real,
) -> Result<Array1<Real>, FeatureError> {
    if waveforms.ncols() == 0 {
        return Err(FeatureError::EmptyWaveform);
    }
    if !(transconductance.is_finite() && transconductance > 0.0) {
        return Err(FeatureError::Transconductance(transconductance));
    }
    let scale = charge_norm / transconductance;
    Ok(waveforms.map_axis(Axis(1), |event| scale * simpson(event, sample_interval)))
}

/// Composite Simpson integral of uniformly spaced samples.
///
/// An odd number of intervals cannot be covered by Simpson's rule alone, so
/// the result averages two estimates which each place one trapezoid at
/// opposite ends of the grid. Two samples reduce to the trapezoid rule and a
/// single sample integrates to zero.
pub fn simpson(y: ArrayView1<Real>, dx: Real) -> Real {
    match y.len() {
        0 | 1 => 0.0,
        2 => trapezoid(y[0], y[1], dx),
        n if n % 2 == 1 => simpson_even_intervals(y, dx),
        n => {
            let head = simpson_even_intervals(y.slice(s![..n - 1]), dx)
                + trapezoid(y[n - 2], y[n - 1], dx);
            let tail = trapezoid(y[0], y[1], dx) + simpson_even_intervals(y.slice(s![1..]), dx);
            0.5 * (head + tail)
        }
    }
}

fn trapezoid(a: Real, b: Real, dx: Real) -> Real {
    0.5 * dx * (a + b)
}

/// Requires an odd number of samples.
fn simpson_even_intervals(y: ArrayView1<Real>, dx: Real) -> Real {
    let last = y.len() - 1;
    let weighted: Real = y
        .iter()
        .enumerate()
        .map(|(i, &v)| match i {
            0 => v,
            i if i == last => v,
            i if i % 2 == 1 => 4.0 * v,
            _ => 2.0 * v,
        })
        .sum();
    weighted * dx / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn constant_voltage_is_exact() {
        for samples in [2, 3, 4, 7, 10] {
            let waveforms = Array2::from_elem((1, samples), 0.25);
            let q = charge(waveforms.view(), 2e-9, 4.4e3, 1e15).unwrap();
            let expected = 0.25 * (samples - 1) as Real * 2e-9 / 4.4e3 * 1e15;
            assert_approx_eq!(q[0], expected, 1e-9);
        }
    }

    #[test]
    fn cubic_with_odd_sample_count_is_exact() {
        let y: Array1<Real> = (0..9).map(|i| (i as Real).powi(3)).collect();
        assert_approx_eq!(simpson(y.view(), 1.0), 8.0_f64.powi(4) / 4.0, 1e-9);
    }

    #[test]
    fn even_sample_count_averages_both_ends() {
        let y = array![0.0, 1.0, 4.0, 9.0];
        assert_approx_eq!(simpson(y.view(), 1.0), 55.0 / 6.0, 1e-12);
    }

    #[test]
    fn degenerate_lengths() {
        assert_eq!(simpson(array![3.0].view(), 1.0), 0.0);
        assert_approx_eq!(simpson(array![1.0, 3.0].view(), 0.5), 1.0);
    }

    #[test]
    fn charge_is_linear() {
        let a = array![[0.0, 0.1, 0.3, 0.2, 0.05, 0.0]];
        let b = array![[0.0, -0.2, 0.1, 0.4, 0.1, 0.02]];
        let combined = &a * 2.0 + &b * -3.0;
        let qa = charge(a.view(), 1e-9, 15.7e3, 1e15).unwrap();
        let qb = charge(b.view(), 1e-9, 15.7e3, 1e15).unwrap();
        let qc = charge(combined.view(), 1e-9, 15.7e3, 1e15).unwrap();
        assert_approx_eq!(qc[0], 2.0 * qa[0] - 3.0 * qb[0], 1e-9);
    }

    #[test]
    fn rejects_empty_events_and_bad_transconductance() {
        let empty = Array2::<Real>::zeros((2, 0));
        assert_eq!(
            charge(empty.view(), 1e-9, 4.4e3, 1e15).unwrap_err(),
            FeatureError::EmptyWaveform
        );
        let waveforms = Array2::<Real>::zeros((2, 4));
        assert_eq!(
            charge(waveforms.view(), 1e-9, 0.0, 1e15).unwrap_err(),
            FeatureError::Transconductance(0.0)
        );
    }
}
